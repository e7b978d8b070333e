use thiserror::Error;
use uuid::Uuid;

use eclair_shared::TransportError;
use eclair_store::{DeliveryStatus, StoreError};

/// Errors surfaced by the delivery queue API.
///
/// Delivery failures themselves never show up here: they become terminal
/// state transitions plus one `messageFailed` bus event.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No signed-in user; cannot enqueue")]
    NoIdentity,

    #[error("Invalid draft: {0}")]
    InvalidDraft(String),

    #[error("Unknown queued message: {0}")]
    UnknownMessage(Uuid),

    #[error("Invalid delivery transition for {temp_id}: {from} -> {to}")]
    InvalidTransition {
        temp_id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("Message {0} is being delivered")]
    Busy(Uuid),

    #[error("Delivery queue has shut down")]
    ShutDown,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors of the cache store.  `Clone` so that coalesced refresh callers
/// all receive the same failure.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("No snapshot source configured")]
    NoSource,

    #[error("Snapshot fetch failed: {0}")]
    Fetch(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

/// Errors of the notification reliability manager.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification manager is not initialised")]
    NotInitialized,

    #[error("Initialisation superseded by teardown or identity change")]
    Superseded,

    #[error("Push token unavailable after {attempts} attempts")]
    TokenUnavailable { attempts: usize },

    #[error("Push platform error: {0}")]
    Platform(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for NotifyError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

/// Failure reported by the device push platform.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

/// Errors building the [`ClientCore`](crate::ClientCore).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
