//! # eclair-shared
//!
//! Domain vocabulary shared by the store and client crates: identifiers,
//! media and visibility kinds, session identity, the error taxonomy used to
//! classify backend failures, and the notification suppression policy.
//!
//! Nothing in this crate performs I/O.

pub mod constants;
pub mod error;
pub mod identity;
pub mod suppression;
pub mod types;

pub use error::{ErrorClass, TransportError};
pub use identity::Identity;
pub use suppression::{should_suppress, SuppressionInput, SuppressionReason};
pub use types::{AppState, MediaKind, VisibilityMode};
