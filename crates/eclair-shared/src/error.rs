use thiserror::Error;

/// Class of a backend failure.  The class alone decides whether the call
/// is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, 5xx, failed validation probe. Retried with backoff.
    Transient,
    /// Auth rejected, receiver not found, malformed media reference.
    Permanent,
}

/// Failure reported by a backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transient transport failure: {0}")]
    Transient(String),

    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Permanent(r) => r,
        }
    }
}
