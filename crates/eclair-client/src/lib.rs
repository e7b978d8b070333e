//! # eclair-client
//!
//! Client-resident delivery core: an offline-resilient delivery queue, a
//! notification reliability manager and a bus-driven snapshot cache.
//!
//! Everything is constructed once through [`ClientCore`] and handed to its
//! dependents explicitly; the UI layer talks to the core through the
//! [`EventBus`] topics and the [`CacheStore`] read API.

pub mod backend;
pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod notifier;
pub mod platform;
pub mod queue;
pub mod retry;
pub mod single_flight;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use crate::backend::{BackendTransport, OutgoingMetadata, PushRequest, SnapshotSource};
pub use crate::bus::{EventBus, Subscription};
pub use crate::cache::CacheStore;
pub use crate::client::ClientCore;
pub use crate::config::CoreConfig;
pub use crate::error::{CacheError, CoreError, NotifyError, QueueError};
pub use crate::events::BusEvent;
pub use crate::notifier::{NotificationManager, NotifierState};
pub use crate::platform::{DeviceProfile, PermissionStatus, PushPlatform};
pub use crate::queue::{DeliveryQueue, MessageDraft, ProcessOutcome};
pub use crate::state::{PresenceState, SharedDatabase};

/// Install the global `tracing` subscriber.
///
/// Honours `RUST_LOG`; safe to call more than once (later calls are no-ops).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("eclair_client=debug,eclair_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Eclair delivery core logging initialised");
    }
}
