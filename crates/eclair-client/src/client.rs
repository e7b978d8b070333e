//! The process-wide delivery core.
//!
//! [`ClientCore`] is built once at app start.  It owns the bus and the
//! three services, hands each one its dependencies explicitly, and is the
//! single place the host reports lifecycle changes to: identity,
//! connectivity, app state and incoming messages.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use eclair_shared::{AppState, Identity};
use eclair_store::Database;

use crate::backend::{BackendTransport, SnapshotSource};
use crate::bus::EventBus;
use crate::cache::CacheStore;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::{BusEvent, ConnectivityPayload, ConversationPayload, IncomingMessage};
use crate::http::HttpTransport;
use crate::notifier::{NotificationManager, NotifierConfig, NotifierState};
use crate::platform::PushPlatform;
use crate::queue::{DeliveryQueue, MessageDraft};
use crate::state::{lock, share, PresenceState, SharedDatabase};

pub struct ClientCore {
    config: CoreConfig,
    db: SharedDatabase,
    bus: EventBus,
    presence: PresenceState,
    cache: CacheStore,
    queue: DeliveryQueue,
    notifier: NotificationManager,
    identity: Mutex<Option<Identity>>,
}

impl ClientCore {
    /// Wire the core around an opened database and the host's collaborators.
    pub fn new(
        config: CoreConfig,
        db: Database,
        transport: Arc<dyn BackendTransport>,
        snapshots: Option<Arc<dyn SnapshotSource>>,
        platform: Arc<dyn PushPlatform>,
        blocked: watch::Receiver<HashSet<String>>,
    ) -> Result<Self, CoreError> {
        let config = config.normalize();
        let db = share(db);
        let bus = EventBus::new();
        let presence = PresenceState::new();

        let cache = CacheStore::new(db.clone(), config.cache_ttl_ms, snapshots);
        cache.attach(&bus);

        let queue = DeliveryQueue::new(
            db.clone(),
            bus.clone(),
            transport.clone(),
            config.retry_policy(),
            config.upload_concurrency,
        )?;
        queue.attach(&bus);

        let notifier = NotificationManager::new(
            db.clone(),
            bus.clone(),
            transport,
            platform,
            presence.clone(),
            blocked,
            NotifierConfig::from(&config),
        );
        notifier.attach(&bus);

        info!(
            backend = %config.backend_url,
            concurrency = config.upload_concurrency,
            "delivery core ready"
        );

        Ok(Self {
            config,
            db,
            bus,
            presence,
            cache,
            queue,
            notifier,
            identity: Mutex::new(None),
        })
    }

    /// Open the database from the configured data dir and talk to the
    /// configured backend over HTTP.
    pub fn open(
        config: CoreConfig,
        platform: Arc<dyn PushPlatform>,
        blocked: watch::Receiver<HashSet<String>>,
    ) -> Result<Self, CoreError> {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in_dir(dir)?,
            None => Database::new()?,
        };
        let http = Arc::new(HttpTransport::new(&config.backend_url, config.http_timeout())?);
        let snapshots: Arc<dyn SnapshotSource> = http.clone();
        Self::new(config, db, http, Some(snapshots), platform, blocked)
    }

    /// Report the signed-in identity, or `None` on logout.
    ///
    /// A different account than the last one clears the push token and the
    /// cached snapshots before notifications come back up.
    pub async fn set_identity(
        &self,
        identity: Option<Identity>,
    ) -> Result<Option<NotifierState>, CoreError> {
        let Some(identity) = identity else {
            *lock(&self.identity) = None;
            self.queue.set_sender(None);
            self.notifier.teardown(false);
            info!("signed out");
            return Ok(None);
        };

        let previous = {
            let db = lock(&self.db);
            let previous = db.last_user_id()?;
            db.set_last_user_id(&identity.user_id)?;
            previous
        };
        if previous.as_deref().map_or(false, |last| last != identity.user_id) {
            info!(user = %identity.user_id, "different account signed in");
            self.notifier.teardown(true);
            self.cache.clear();
        }

        *lock(&self.identity) = Some(identity.clone());
        self.queue.set_sender(Some(identity.user_id.clone()));

        let state = self.notifier.initialize(identity).await?;
        Ok(Some(state))
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.identity).clone()
    }

    pub fn enqueue(&self, draft: MessageDraft) -> Result<Uuid, CoreError> {
        Ok(self.queue.enqueue(draft)?)
    }

    pub fn connectivity_changed(&self, online: bool) {
        self.bus
            .publish(BusEvent::ConnectivityChanged(ConnectivityPayload { online }));
    }

    /// Record a new app state; coming back to `active` from elsewhere
    /// publishes `appReturnedFromBackground`.
    pub fn app_state_changed(&self, state: AppState) {
        let previous = self.presence.set_app_state(state);
        if state.is_foreground() && !previous.is_foreground() {
            self.bus.publish(BusEvent::AppReturnedFromBackground);
        }
    }

    /// The conversation now on screen, if any.
    pub fn viewing_chat(&self, peer_id: Option<String>) {
        self.presence.set_viewing_chat(peer_id);
    }

    pub fn home_screen_visible(&self, visible: bool) {
        self.presence.set_home_screen_visible(visible);
    }

    /// The user opened the app by tapping a notification.
    pub fn opened_from_notification(&self, conversation_id: &str) {
        self.bus
            .publish(BusEvent::AppOpenedFromNotification(ConversationPayload {
                conversation_id: conversation_id.to_string(),
            }));
    }

    /// A message for the signed-in user arrived over the realtime channel.
    pub fn message_received(&self, message: IncomingMessage) {
        self.bus.publish(BusEvent::MessageReceived(message));
    }

    pub fn conversation_updated(&self, conversation_id: &str) {
        self.bus.publish(BusEvent::ConversationUpdate(ConversationPayload {
            conversation_id: conversation_id.to_string(),
        }));
    }

    /// Release bus subscriptions and stop background work.  Persisted state
    /// is kept for the next launch.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.cache.detach();
        self.notifier.detach();
        self.notifier.teardown(false);
        info!("delivery core shut down");
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn notifier(&self) -> &NotificationManager {
        &self.notifier
    }

    pub fn presence(&self) -> &PresenceState {
        &self.presence
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }
}
