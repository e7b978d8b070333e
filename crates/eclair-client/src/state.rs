//! State shared across the core's services.
//!
//! [`SharedDatabase`] is the single store handle every service writes
//! through, and [`PresenceState`] is what the host reports about the
//! foreground: app state, the open conversation and whether the home list
//! is on screen.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use eclair_shared::AppState;
use eclair_store::Database;

/// Store handle shared by the queue, the cache and the notifier.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Wrap an opened [`Database`] for sharing.
pub fn share(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the user currently has on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub app_state: AppState,
    /// Peer id of the conversation open on screen, if any.
    pub viewing_chat_with: Option<String>,
    pub home_screen_visible: bool,
}

/// Cloneable handle on the current [`Presence`].
#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    inner: Arc<RwLock<Presence>>,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Presence {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a new app state and return the previous one.
    pub fn set_app_state(&self, state: AppState) -> AppState {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut guard.app_state, state)
    }

    pub fn set_viewing_chat(&self, peer_id: Option<String>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .viewing_chat_with = peer_id;
    }

    pub fn set_home_screen_visible(&self, visible: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .home_screen_visible = visible;
    }
}
