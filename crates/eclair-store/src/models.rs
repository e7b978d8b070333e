//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize`: records are stored as
//! JSON and the same shapes are handed to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eclair_shared::{MediaKind, VisibilityMode};

// ---------------------------------------------------------------------------
// Delivery queue
// ---------------------------------------------------------------------------

/// Position of an outbound message in the upload → send state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Queued,
    UploadingMedia,
    SendingMetadata,
    RetryPending,
    Sent,
    FailedTerminal,
}

impl DeliveryStatus {
    /// `sent` and `failedTerminal` see no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::FailedTerminal)
    }

    /// Network work is underway for this entry.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::UploadingMedia | Self::SendingMetadata)
    }

    /// Allowed edges of the delivery state machine.
    ///
    /// In-flight states may fall back to `queued` when a restart interrupted
    /// them, and `failedTerminal` may return to `queued` on a manual retry.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;

        matches!(
            (self, next),
            (Queued, UploadingMedia)
                | (UploadingMedia, SendingMetadata)
                | (UploadingMedia, RetryPending)
                | (UploadingMedia, FailedTerminal)
                | (UploadingMedia, Queued)
                | (SendingMetadata, Sent)
                | (SendingMetadata, RetryPending)
                | (SendingMetadata, FailedTerminal)
                | (SendingMetadata, Queued)
                | (RetryPending, Queued)
                | (FailedTerminal, Queued)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::UploadingMedia => "uploadingMedia",
            Self::SendingMetadata => "sendingMetadata",
            Self::RetryPending => "retryPending",
            Self::Sent => "sent",
            Self::FailedTerminal => "failedTerminal",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound snap owned by the delivery queue until it reaches a terminal
/// state.  `temp_id` is the only stable identity until the backend assigns
/// `server_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Client-generated identifier, stable across restarts.
    pub temp_id: Uuid,
    pub receiver_id: String,
    pub sender_id: String,
    /// Opaque reference to the compressed file on local storage.
    pub local_media_ref: String,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub size_bytes: u64,
    pub visibility_mode: VisibilityMode,
    pub caption_text: Option<String>,
    pub status: DeliveryStatus,
    /// Number of failed delivery attempts so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    /// Assigned by the backend once the metadata send succeeds.
    pub server_id: Option<String>,
    /// Remote URL of the media once uploaded; a retry skips the upload.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Earliest time a `retryPending` entry may run again.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Per-message jitter draw in `[0, 1)`, fixed at enqueue time.
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Whether the entry may be picked up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Queued => true,
            DeliveryStatus::RetryPending => self.next_attempt_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Push token
// ---------------------------------------------------------------------------

/// Mobile platform issuing push tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

/// The installation's push token.  Only validated tokens are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub value: String,
    pub format_valid: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub platform: Platform,
}

impl PushToken {
    pub fn new(value: impl Into<String>, platform: Platform) -> Self {
        let value = value.into();
        Self {
            format_valid: Self::is_well_formed(&value),
            value,
            last_validated_at: None,
            platform,
        }
    }

    /// Accepts Expo wrapped tokens, 64-hex APNs tokens and FCM registration
    /// tokens.
    pub fn is_well_formed(value: &str) -> bool {
        for prefix in ["ExponentPushToken[", "ExpoPushToken["] {
            if let Some(inner) = value.strip_prefix(prefix) {
                return inner
                    .strip_suffix(']')
                    .map_or(false, |id| !id.is_empty() && !id.contains(char::is_whitespace));
            }
        }

        if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            return true;
        }

        value.len() >= 100
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-'))
    }

    /// Validated no longer ago than `max_age`.
    pub fn validated_within(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.format_valid
            && self
                .last_validated_at
                .map_or(false, |at| now.signed_duration_since(at) <= max_age)
    }
}

// ---------------------------------------------------------------------------
// Health report
// ---------------------------------------------------------------------------

/// How much the device's own power management endangers delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSeverity {
    None,
    Warning,
    Critical,
}

/// Verdict of a diagnostic pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    RequiresAttention,
}

/// Point-in-time snapshot of notification-delivery capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub permissions_healthy: bool,
    pub token_healthy: bool,
    pub channels_healthy: bool,
    pub device_severity: DeviceSeverity,
    pub overall: OverallHealth,
    /// Human-readable remediation steps, one per finding.
    pub remediation: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == OverallHealth::Healthy
    }
}

// ---------------------------------------------------------------------------
// Notification settings
// ---------------------------------------------------------------------------

/// User-tunable notification switches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub messages: bool,
    pub sounds: bool,
    pub vibration: bool,
    pub badges: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            messages: true,
            sounds: true,
            vibration: true,
            badges: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache snapshot
// ---------------------------------------------------------------------------

/// A persisted cache snapshot of a conversation or message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedRecord {
    pub key: String,
    pub payload: serde_json::Value,
    pub last_updated_at: DateTime<Utc>,
    pub ttl_ms: u64,
    /// Set by invalidation; the payload is kept for instant rendering.
    pub stale: bool,
}

impl CachedRecord {
    /// Stale when invalidated or when `now - last_updated_at > ttl`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        if self.stale {
            return true;
        }
        let age = now.signed_duration_since(self.last_updated_at);
        age.num_milliseconds() > self.ttl_ms as i64
    }
}
