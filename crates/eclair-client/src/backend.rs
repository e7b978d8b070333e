//! Seams to the backend.  The production implementation lives in
//! [`crate::http`]; tests script their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use eclair_shared::types::MediaRef;
use eclair_shared::{MediaKind, TransportError, VisibilityMode};
use eclair_store::QueuedMessage;

/// Message metadata sent once the media is uploaded.
///
/// `client_message_id` carries the queue's `temp_id` so that the backend can
/// deduplicate a send that was retried after a lost response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMetadata {
    pub client_message_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    /// URL returned by the media upload.
    pub media_url: String,
    pub media_kind: MediaKind,
    pub visibility_mode: VisibilityMode,
    pub caption_text: Option<String>,
    /// When the draft was enqueued.
    pub created_at: DateTime<Utc>,
}

impl OutgoingMetadata {
    pub fn for_entry(entry: &QueuedMessage, media_url: impl Into<String>) -> Self {
        Self {
            client_message_id: entry.temp_id,
            sender_id: entry.sender_id.clone(),
            receiver_id: entry.receiver_id.clone(),
            media_url: media_url.into(),
            media_kind: entry.media_kind,
            visibility_mode: entry.visibility_mode,
            caption_text: entry.caption_text.clone(),
            created_at: entry.created_at,
        }
    }
}

/// A push the backend should fan out to one user's devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Recipient of the push.
    pub user_id: String,
    pub title: String,
    pub body: String,
    /// Routing data for the tap handler plus the user's notification
    /// settings.
    pub data: Value,
}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Upload a local media file and return its remote URL.
    async fn upload_media(&self, media: &MediaRef) -> Result<String, TransportError>;

    /// Send message metadata and return the server-assigned id.
    async fn send_message(&self, metadata: &OutgoingMetadata) -> Result<String, TransportError>;

    /// Ask the backend to deliver a push notification.
    async fn queue_push(&self, request: &PushRequest) -> Result<(), TransportError>;

    /// Probe whether the backend still accepts `token`.
    async fn validate_token(&self, token: &str) -> Result<bool, TransportError>;
}

/// Where the cache fetches fresh snapshots from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, key: &str) -> Result<Value, TransportError>;
}
