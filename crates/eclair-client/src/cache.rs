//! TTL-aware snapshot cache of conversations and messages.
//!
//! Entries live in memory and are mirrored to the `cache_entries` table so
//! the UI can render instantly after a restart.  Nothing outside this module
//! mutates an entry: the UI reads through [`CacheStore::get`] and listens to
//! [`CacheStore::changes`]; updates arrive from bus events and from
//! [`CacheStore::refresh`].
//!
//! Invalidation marks an entry stale instead of erasing it, so a stale
//! payload can still be shown while a refresh is in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use eclair_store::CachedRecord;

use crate::backend::SnapshotSource;
use crate::bus::{EventBus, Subscription};
use crate::error::CacheError;
use crate::events::{
    BusEvent, TOPIC_APP_OPENED_FROM_NOTIFICATION, TOPIC_APP_RETURNED_FROM_BACKGROUND,
    TOPIC_CONVERSATION_UPDATE, TOPIC_MESSAGE_RECEIVED, TOPIC_MESSAGE_SENT,
};
use crate::single_flight::SingleFlight;
use crate::state::{lock, SharedDatabase};

/// Key of the conversation list snapshot.
pub const CONVERSATIONS_KEY: &str = "conversations";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Key of the snapshot of the conversation with `peer_id`.
pub fn conversation_key(peer_id: &str) -> String {
    format!("conversation:{peer_id}")
}

/// Key of a confirmed message snapshot.
pub fn message_key(server_id: &str) -> String {
    format!("message:{server_id}")
}

/// Result of [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: Value,
    /// Invalidated, or older than its TTL.
    pub stale: bool,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Updated(String),
    Invalidated(String),
    InvalidatedAll,
    Cleared,
}

struct CacheInner {
    db: SharedDatabase,
    entries: Mutex<HashMap<String, CachedRecord>>,
    default_ttl_ms: u64,
    source: Option<Arc<dyn SnapshotSource>>,
    flights: SingleFlight<String, Result<Value, CacheError>>,
    force_refresh: AtomicBool,
    changes: broadcast::Sender<CacheChange>,
    subscriptions: Mutex<Vec<Subscription>>,
}

#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl CacheStore {
    /// Build the cache and load persisted snapshots.
    ///
    /// A failed load is logged and the cache starts empty.
    pub fn new(
        db: SharedDatabase,
        default_ttl_ms: u64,
        source: Option<Arc<dyn SnapshotSource>>,
    ) -> Self {
        let loaded = match lock(&db).load_cache_entries() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load cache snapshots, starting empty");
                Vec::new()
            }
        };
        debug!(entries = loaded.len(), "cache snapshots loaded");

        let entries = loaded
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(CacheInner {
                db,
                entries: Mutex::new(entries),
                default_ttl_ms,
                source,
                flights: SingleFlight::new(),
                force_refresh: AtomicBool::new(false),
                changes,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheLookup> {
        let now = Utc::now();
        lock(&self.inner.entries).get(key).map(|record| CacheLookup {
            payload: record.payload.clone(),
            stale: record.is_stale_at(now),
            last_updated_at: record.last_updated_at,
        })
    }

    pub fn set(&self, key: &str, payload: Value, ttl_ms: u64) -> Result<(), CacheError> {
        self.inner.set(key, payload, ttl_ms)
    }

    /// [`set`](Self::set) with the configured default TTL.
    pub fn set_default(&self, key: &str, payload: Value) -> Result<(), CacheError> {
        self.inner.set(key, payload, self.inner.default_ttl_ms)
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Drop every snapshot, in memory and on disk.  Used on account switch.
    pub fn clear(&self) {
        lock(&self.inner.entries).clear();
        if let Err(e) = lock(&self.inner.db).clear_cache_entries() {
            warn!(error = %e, "failed to clear persisted cache snapshots");
        }
        let _ = self.inner.changes.send(CacheChange::Cleared);
    }

    /// Fetch `key` from the snapshot source and store it.
    ///
    /// Concurrent refreshes of one key share a single fetch and all receive
    /// its result.
    pub async fn refresh(&self, key: &str) -> Result<Value, CacheError> {
        let source = self.inner.source.clone().ok_or(CacheError::NoSource)?;
        let weak = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();

        self.inner
            .flights
            .run(key.to_string(), move || fetch_and_store(source, weak, owned_key))
            .await
    }

    pub fn refresh_in_flight(&self, key: &str) -> bool {
        self.inner.flights.in_flight(&key.to_string())
    }

    /// Consume the flag raised when the app came back from background.
    pub fn take_force_refresh(&self) -> bool {
        self.inner.force_refresh.swap(false, Ordering::AcqRel)
    }

    /// Change feed for UI consumers.
    pub fn changes(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to the delivery and lifecycle topics that invalidate
    /// snapshots.  Calling it again replaces the previous subscriptions.
    pub fn attach(&self, bus: &EventBus) {
        let topics = [
            TOPIC_MESSAGE_SENT,
            TOPIC_MESSAGE_RECEIVED,
            TOPIC_CONVERSATION_UPDATE,
            TOPIC_APP_RETURNED_FROM_BACKGROUND,
            TOPIC_APP_OPENED_FROM_NOTIFICATION,
        ];

        let subscriptions: Vec<Subscription> = topics
            .iter()
            .map(|topic| {
                let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
                bus.subscribe(topic, move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_event(event)?;
                    }
                    Ok(())
                })
            })
            .collect();

        let previous = std::mem::replace(&mut *lock(&self.inner.subscriptions), subscriptions);
        drop(previous);
    }

    pub fn detach(&self) {
        let previous = std::mem::take(&mut *lock(&self.inner.subscriptions));
        drop(previous);
    }
}

async fn fetch_and_store(
    source: Arc<dyn SnapshotSource>,
    cache: Weak<CacheInner>,
    key: String,
) -> Result<Value, CacheError> {
    debug!(key = %key, "fetching snapshot");
    let payload = source.fetch_snapshot(&key).await?;
    if let Some(inner) = cache.upgrade() {
        let ttl = inner.default_ttl_ms;
        inner.set(&key, payload.clone(), ttl)?;
    }
    Ok(payload)
}

impl CacheInner {
    fn set(&self, key: &str, payload: Value, ttl_ms: u64) -> Result<(), CacheError> {
        let record = CachedRecord {
            key: key.to_string(),
            payload,
            last_updated_at: Utc::now(),
            ttl_ms,
            stale: false,
        };

        lock(&self.entries).insert(key.to_string(), record.clone());
        let persisted = lock(&self.db).upsert_cache_entry(&record);
        let _ = self.changes.send(CacheChange::Updated(key.to_string()));

        persisted.map_err(|e| {
            warn!(key, error = %e, "failed to persist cache snapshot");
            CacheError::from(e)
        })
    }

    fn invalidate(&self, key: &str) {
        let known = match lock(&self.entries).get_mut(key) {
            Some(record) => {
                record.stale = true;
                true
            }
            None => false,
        };
        if !known {
            return;
        }

        if let Err(e) = lock(&self.db).mark_cache_stale(key) {
            warn!(key, error = %e, "failed to persist cache invalidation");
        }
        debug!(key, "cache entry invalidated");
        let _ = self.changes.send(CacheChange::Invalidated(key.to_string()));
    }

    fn invalidate_all(&self) {
        for record in lock(&self.entries).values_mut() {
            record.stale = true;
        }
        if let Err(e) = lock(&self.db).mark_all_cache_stale() {
            warn!(error = %e, "failed to persist cache invalidation");
        }
        debug!("all cache entries invalidated");
        let _ = self.changes.send(CacheChange::InvalidatedAll);
    }

    fn invalidate_conversation(&self, peer_id: &str) {
        self.invalidate(&conversation_key(peer_id));
        self.invalidate(CONVERSATIONS_KEY);
    }

    fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::MessageSent(sent) => {
                let snapshot = serde_json::to_value(sent)?;
                self.set(&message_key(&sent.server_id), snapshot, self.default_ttl_ms)?;
                self.invalidate_conversation(&sent.receiver_id);
            }
            BusEvent::MessageReceived(msg) => self.invalidate_conversation(&msg.conversation_id),
            BusEvent::ConversationUpdate(update) => {
                self.invalidate_conversation(&update.conversation_id)
            }
            BusEvent::AppReturnedFromBackground => {
                self.invalidate_all();
                self.force_refresh.store(true, Ordering::Release);
            }
            BusEvent::AppOpenedFromNotification(opened) => {
                self.invalidate(&conversation_key(&opened.conversation_id));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::share;
    use eclair_store::Database;

    fn store() -> CacheStore {
        let db = share(Database::open_in_memory().unwrap());
        CacheStore::new(db, 60_000, None)
    }

    #[test]
    fn set_then_get_is_fresh() {
        let cache = store();
        cache.set("k", json!({"a": 1}), 60_000).unwrap();

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.payload, json!({"a": 1}));
        assert!(!hit.stale);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn zero_ttl_goes_stale() {
        let cache = store();
        cache.set("k", json!(1), 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("k").unwrap().stale);
    }

    #[test]
    fn invalidate_keeps_payload() {
        let cache = store();
        cache.set("k", json!("v"), 60_000).unwrap();
        cache.invalidate("k");
        cache.invalidate("k");

        let hit = cache.get("k").unwrap();
        assert!(hit.stale);
        assert_eq!(hit.payload, json!("v"));
    }

    #[test]
    fn background_return_invalidates_everything_and_flags_refresh() {
        let cache = store();
        let bus = EventBus::new();
        cache.attach(&bus);
        cache.set("a", json!(1), 60_000).unwrap();
        cache.set("b", json!(2), 60_000).unwrap();

        bus.publish(BusEvent::AppReturnedFromBackground);

        assert!(cache.get("a").unwrap().stale);
        assert!(cache.get("b").unwrap().stale);
        assert!(cache.take_force_refresh());
        assert!(!cache.take_force_refresh());
    }

    #[test]
    fn detach_stops_invalidation() {
        let cache = store();
        let bus = EventBus::new();
        cache.attach(&bus);
        assert_eq!(bus.subscriber_count(TOPIC_MESSAGE_SENT), 1);

        cache.detach();
        assert_eq!(bus.subscriber_count(TOPIC_MESSAGE_SENT), 0);

        cache.set("a", json!(1), 60_000).unwrap();
        bus.publish(BusEvent::AppReturnedFromBackground);
        assert!(!cache.get("a").unwrap().stale);
    }

    #[tokio::test]
    async fn refresh_without_source_fails() {
        let cache = store();
        assert!(matches!(cache.refresh("k").await, Err(CacheError::NoSource)));
    }

    #[test]
    fn change_feed_reports_updates() {
        let cache = store();
        let mut rx = cache.changes();
        cache.set("k", json!(1), 60_000).unwrap();
        cache.invalidate("k");

        assert_eq!(rx.try_recv().unwrap(), CacheChange::Updated("k".into()));
        assert_eq!(rx.try_recv().unwrap(), CacheChange::Invalidated("k".into()));
    }
}
