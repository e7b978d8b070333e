mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use eclair_client::cache::{conversation_key, message_key, CacheChange, CONVERSATIONS_KEY};
use eclair_client::events::{ConversationPayload, MessageSentPayload};
use eclair_client::state::share;
use eclair_client::{BusEvent, CacheError, CacheStore, EventBus, SnapshotSource};
use eclair_shared::{MediaKind, VisibilityMode};
use eclair_store::Database;

use common::{incoming, MockSnapshots};

fn attached(source: Option<Arc<MockSnapshots>>) -> (CacheStore, EventBus) {
    let source = source.map(|s| s as Arc<dyn SnapshotSource>);
    let db = share(Database::open_in_memory().expect("db"));
    let cache = CacheStore::new(db, 60_000, source);
    let bus = EventBus::new();
    cache.attach(&bus);
    (cache, bus)
}

fn seed(cache: &CacheStore, keys: &[&str]) {
    for key in keys {
        cache.set_default(key, json!({ "seeded": key })).expect("seed");
    }
}

#[tokio::test]
async fn incoming_message_invalidates_its_conversation() {
    let (cache, bus) = attached(None);
    seed(
        &cache,
        &[CONVERSATIONS_KEY, conversation_key("u2").as_str(), conversation_key("u3").as_str()],
    );

    bus.publish(BusEvent::MessageReceived(incoming("m1", "u2")));

    assert!(cache.get(CONVERSATIONS_KEY).expect("list").stale);
    let conversation = cache.get(&conversation_key("u2")).expect("conversation");
    assert!(conversation.stale);
    assert_eq!(conversation.payload["seeded"], "conversation:u2");
    assert!(!cache.get(&conversation_key("u3")).expect("other").stale);
}

#[tokio::test]
async fn sent_message_is_cached_and_invalidates_the_thread() {
    let (cache, bus) = attached(None);
    seed(&cache, &[CONVERSATIONS_KEY, conversation_key("u2").as_str()]);

    bus.publish(BusEvent::MessageSent(MessageSentPayload {
        temp_id: Uuid::new_v4(),
        server_id: "srv-7".into(),
        sender_id: "u1".into(),
        receiver_id: "u2".into(),
        media_kind: MediaKind::Video,
        visibility_mode: VisibilityMode::OneTime,
        caption_text: None,
        media_url: Some("https://cdn.test/v.mp4".into()),
        sent_at: Utc::now(),
    }));

    let message = cache.get(&message_key("srv-7")).expect("message snapshot");
    assert!(!message.stale);
    assert_eq!(message.payload["serverId"], "srv-7");
    assert_eq!(message.payload["mediaUrl"], "https://cdn.test/v.mp4");
    assert!(cache.get(&conversation_key("u2")).expect("thread").stale);
    assert!(cache.get(CONVERSATIONS_KEY).expect("list").stale);
}

#[tokio::test]
async fn returning_to_foreground_invalidates_everything() {
    let (cache, bus) = attached(None);
    seed(&cache, &[CONVERSATIONS_KEY, conversation_key("u2").as_str()]);
    let mut changes = cache.changes();

    bus.publish(BusEvent::AppReturnedFromBackground);

    assert!(cache.get(CONVERSATIONS_KEY).expect("list").stale);
    assert!(cache.get(&conversation_key("u2")).expect("thread").stale);
    assert_eq!(changes.try_recv().expect("change"), CacheChange::InvalidatedAll);
    assert!(cache.take_force_refresh());
    assert!(!cache.take_force_refresh());
}

#[tokio::test]
async fn opening_a_notification_invalidates_that_conversation_only() {
    let (cache, bus) = attached(None);
    seed(&cache, &[CONVERSATIONS_KEY, conversation_key("u2").as_str()]);

    bus.publish(BusEvent::AppOpenedFromNotification(ConversationPayload {
        conversation_id: "u2".into(),
    }));

    assert!(cache.get(&conversation_key("u2")).expect("thread").stale);
    assert!(!cache.get(CONVERSATIONS_KEY).expect("list").stale);
}

#[tokio::test]
async fn detached_cache_ignores_events() {
    let (cache, bus) = attached(None);
    seed(&cache, &[CONVERSATIONS_KEY]);

    cache.detach();
    bus.publish(BusEvent::ConversationUpdate(ConversationPayload {
        conversation_id: "u2".into(),
    }));
    assert!(!cache.get(CONVERSATIONS_KEY).expect("list").stale);
}

#[tokio::test]
async fn concurrent_refreshes_share_one_fetch() {
    let source = MockSnapshots::new();
    source.set_latency(Duration::from_millis(50));
    let (cache, _bus) = attached(Some(source.clone()));
    let key = conversation_key("u2");

    let (a, b, c) = tokio::join!(cache.refresh(&key), cache.refresh(&key), cache.refresh(&key));

    let a = a.expect("first");
    assert_eq!(a, b.expect("second"));
    assert_eq!(a, c.expect("third"));
    assert_eq!(source.fetches(), 1);
    assert!(!cache.refresh_in_flight(&key));

    let stored = cache.get(&key).expect("stored");
    assert!(!stored.stale);
    assert_eq!(stored.payload, a);

    cache.refresh(&key).await.expect("later refresh");
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_the_stale_snapshot() {
    let source = MockSnapshots::new();
    source.set_failing(true);
    let (cache, _bus) = attached(Some(source.clone()));
    cache.set_default(CONVERSATIONS_KEY, json!(["u2"])).expect("seed");
    cache.invalidate(CONVERSATIONS_KEY);

    let err = cache.refresh(CONVERSATIONS_KEY).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(ref e) if e.is_transient()));

    let kept = cache.get(CONVERSATIONS_KEY).expect("kept");
    assert!(kept.stale);
    assert_eq!(kept.payload, json!(["u2"]));
}

#[tokio::test]
async fn refresh_without_source_fails() {
    let (cache, _bus) = attached(None);
    assert!(matches!(
        cache.refresh(CONVERSATIONS_KEY).await,
        Err(CacheError::NoSource)
    ));
}

#[test]
fn snapshots_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");

    {
        let cache = CacheStore::new(share(Database::open_at(&path).expect("open")), 60_000, None);
        cache.set_default("conversation:u2", json!({ "last": "m9" })).expect("set");
        cache.set_default(CONVERSATIONS_KEY, json!(["u2"])).expect("set");
        cache.invalidate(CONVERSATIONS_KEY);
    }

    let cache = CacheStore::new(share(Database::open_at(&path).expect("reopen")), 60_000, None);
    assert_eq!(cache.len(), 2);

    let thread = cache.get("conversation:u2").expect("thread");
    assert_eq!(thread.payload, json!({ "last": "m9" }));
    assert!(!thread.stale);
    assert!(cache.get(CONVERSATIONS_KEY).expect("list").stale);

    cache.clear();
    assert!(cache.is_empty());
    let reopened = CacheStore::new(share(Database::open_at(&path).expect("again")), 60_000, None);
    assert!(reopened.is_empty());
}

#[test]
fn expired_ttl_reads_as_stale() {
    let cache = CacheStore::new(share(Database::open_in_memory().expect("db")), 60_000, None);
    cache.set("short", json!(1), 0).expect("set");
    std::thread::sleep(Duration::from_millis(5));
    assert!(cache.get("short").expect("entry").stale);
}
