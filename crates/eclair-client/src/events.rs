use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use eclair_shared::{MediaKind, VisibilityMode};
use eclair_store::{HealthReport, QueuedMessage};

pub const TOPIC_MESSAGE_QUEUED: &str = "messageQueued";
pub const TOPIC_MESSAGE_SENT: &str = "messageSent";
pub const TOPIC_MESSAGE_FAILED: &str = "messageFailed";
pub const TOPIC_MESSAGE_RECEIVED: &str = "messageReceived";
pub const TOPIC_CONVERSATION_UPDATE: &str = "conversationUpdate";
pub const TOPIC_APP_RETURNED_FROM_BACKGROUND: &str = "appReturnedFromBackground";
pub const TOPIC_APP_OPENED_FROM_NOTIFICATION: &str = "appOpenedFromNotification";
pub const TOPIC_CONNECTIVITY_CHANGED: &str = "connectivityChanged";
pub const TOPIC_HEALTH_ALERT: &str = "healthAlert";

/// Optimistic event: the UI renders a pending bubble keyed on `temp_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQueuedPayload {
    /// Client-generated id, stable until the backend assigns a server id.
    pub temp_id: Uuid,
    /// Recipient user id.
    pub receiver_id: String,
    pub media_kind: MediaKind,
    pub visibility_mode: VisibilityMode,
    /// Optional caption shown under the media.
    pub caption_text: Option<String>,
    /// When the draft was enqueued.
    pub created_at: DateTime<Utc>,
}

impl From<&QueuedMessage> for MessageQueuedPayload {
    fn from(m: &QueuedMessage) -> Self {
        Self {
            temp_id: m.temp_id,
            receiver_id: m.receiver_id.clone(),
            media_kind: m.media_kind,
            visibility_mode: m.visibility_mode,
            caption_text: m.caption_text.clone(),
            created_at: m.created_at,
        }
    }
}

/// A queued message was confirmed by the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    /// Id of the pending bubble this confirmation replaces.
    pub temp_id: Uuid,
    /// Id assigned by the backend.
    pub server_id: String,
    /// Signed-in user that sent the message.
    pub sender_id: String,
    /// Recipient user id; also the conversation key.
    pub receiver_id: String,
    pub media_kind: MediaKind,
    pub visibility_mode: VisibilityMode,
    pub caption_text: Option<String>,
    /// Remote URL of the uploaded media.
    pub media_url: Option<String>,
    /// When the backend accepted the metadata.
    pub sent_at: DateTime<Utc>,
}

/// A queued message reached `failedTerminal`.  Published once per failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFailedPayload {
    pub temp_id: Uuid,
    pub receiver_id: String,
    /// Last error reported by the backend transport.
    pub reason: String,
    /// Delivery attempts made before giving up.
    pub attempts: u32,
}

/// A message addressed to the signed-in user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Server id of the message; keys the dedup set.
    pub message_id: String,
    pub sender_id: String,
    /// Display name used as the notification title.
    pub sender_pseudo: String,
    /// Conversations are keyed by the peer's user id.
    pub conversation_id: String,
    pub media_kind: MediaKind,
    /// Used as the notification body for a single message.
    pub caption_text: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Names the conversation an update or a tapped notification refers to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    /// Peer user id.
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityPayload {
    /// `true` once the network is reachable again.
    pub online: bool,
}

/// Non-blocking advisory raised when remediation could not restore health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAlertPayload {
    /// The report that still failed after remediation.
    pub report: HealthReport,
    /// Whether push initialisation gave up and only in-app delivery remains.
    pub limited_mode: bool,
    /// Remediation text to show the user.
    pub message: String,
}

/// Every event that travels on the [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload", rename_all = "camelCase")]
pub enum BusEvent {
    MessageQueued(MessageQueuedPayload),
    MessageSent(MessageSentPayload),
    MessageFailed(MessageFailedPayload),
    MessageReceived(IncomingMessage),
    ConversationUpdate(ConversationPayload),
    AppReturnedFromBackground,
    AppOpenedFromNotification(ConversationPayload),
    ConnectivityChanged(ConnectivityPayload),
    HealthAlert(HealthAlertPayload),
}

impl BusEvent {
    /// The topic key this event is routed on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::MessageQueued(_) => TOPIC_MESSAGE_QUEUED,
            Self::MessageSent(_) => TOPIC_MESSAGE_SENT,
            Self::MessageFailed(_) => TOPIC_MESSAGE_FAILED,
            Self::MessageReceived(_) => TOPIC_MESSAGE_RECEIVED,
            Self::ConversationUpdate(_) => TOPIC_CONVERSATION_UPDATE,
            Self::AppReturnedFromBackground => TOPIC_APP_RETURNED_FROM_BACKGROUND,
            Self::AppOpenedFromNotification(_) => TOPIC_APP_OPENED_FROM_NOTIFICATION,
            Self::ConnectivityChanged(_) => TOPIC_CONNECTIVITY_CHANGED,
            Self::HealthAlert(_) => TOPIC_HEALTH_ALERT,
        }
    }
}
