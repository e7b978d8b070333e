//! Per-sender grouping of incoming messages and the dedup set bridging the
//! immediate and buffered notification paths.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use eclair_shared::MediaKind;
use eclair_store::NotificationSettings;

use crate::backend::PushRequest;
use crate::events::IncomingMessage;

/// Messages of one sender waiting for the buffer window to close.
pub(crate) struct NotificationBuffer {
    pub messages: Vec<IncomingMessage>,
    pub first_buffered_at: Instant,
    pub flush_timer: Option<JoinHandle<()>>,
}

impl NotificationBuffer {
    pub fn new(first: IncomingMessage) -> Self {
        Self {
            messages: vec![first],
            first_buffered_at: Instant::now(),
            flush_timer: None,
        }
    }

    pub fn remove_message(&mut self, message_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.message_id != message_id);
        self.messages.len() != before
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
    }
}

/// Message ids that already produced an immediate notification.
///
/// Markers expire after the safety window.
#[derive(Debug)]
pub(crate) struct DedupSet {
    window: Duration,
    marked: HashMap<String, Instant>,
}

impl DedupSet {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marked: HashMap::new(),
        }
    }

    pub fn mark(&mut self, message_id: &str) {
        let now = Instant::now();
        self.purge(now);
        self.marked.insert(message_id.to_string(), now);
    }

    pub fn contains(&mut self, message_id: &str) -> bool {
        self.purge(Instant::now());
        self.marked.contains_key(message_id)
    }

    pub fn unmark(&mut self, message_id: &str) {
        self.marked.remove(message_id);
    }

    pub fn clear(&mut self) {
        self.marked.clear();
    }

    fn purge(&mut self, now: Instant) {
        let window = self.window;
        self.marked
            .retain(|_, marked_at| now.saturating_duration_since(*marked_at) < window);
    }
}

/// Title and body of a notification about `messages` from one sender.
pub(crate) fn notification_text(messages: &[IncomingMessage]) -> (String, String) {
    let title = messages
        .last()
        .map(|m| m.sender_pseudo.clone())
        .unwrap_or_default();

    let body = match messages {
        [single] => single
            .caption_text
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match single.media_kind {
                MediaKind::Photo => "Nouveau snap".to_string(),
                MediaKind::Video => "Nouvelle vidéo".to_string(),
            }),
        many => format!("{} nouveaux messages", many.len()),
    };

    (title, body)
}

/// The push asking the backend to notify `user_id` about `messages`.
pub(crate) fn compose_push(
    user_id: &str,
    messages: &[IncomingMessage],
    settings: &NotificationSettings,
) -> PushRequest {
    let (title, body) = notification_text(messages);
    let first = messages.first();

    PushRequest {
        user_id: user_id.to_string(),
        title,
        body,
        data: json!({
            "type": "new_message",
            "senderId": first.map(|m| m.sender_id.as_str()),
            "conversationId": first.map(|m| m.conversation_id.as_str()),
            "messageIds": messages.iter().map(|m| m.message_id.as_str()).collect::<Vec<_>>(),
            "count": messages.len(),
            "sound": settings.sounds,
            "vibrate": settings.vibration,
            "badge": settings.badges,
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn incoming(id: &str, kind: MediaKind, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            message_id: id.into(),
            sender_id: "u2".into(),
            sender_pseudo: "Zoé".into(),
            conversation_id: "u2".into(),
            media_kind: kind,
            caption_text: caption.map(str::to_string),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn single_message_text() {
        let (title, body) = notification_text(&[incoming("m1", MediaKind::Photo, None)]);
        assert_eq!(title, "Zoé");
        assert_eq!(body, "Nouveau snap");

        let (_, body) = notification_text(&[incoming("m1", MediaKind::Video, Some("  "))]);
        assert_eq!(body, "Nouvelle vidéo");

        let (_, body) = notification_text(&[incoming("m1", MediaKind::Photo, Some("regarde"))]);
        assert_eq!(body, "regarde");
    }

    #[test]
    fn grouped_text_counts_messages() {
        let messages: Vec<_> = (0..3)
            .map(|i| incoming(&format!("m{i}"), MediaKind::Photo, None))
            .collect();
        let (_, body) = notification_text(&messages);
        assert_eq!(body, "3 nouveaux messages");
    }

    #[test]
    fn push_payload_carries_settings() {
        let settings = NotificationSettings {
            sounds: false,
            ..NotificationSettings::default()
        };
        let push = compose_push("me", &[incoming("m1", MediaKind::Photo, None)], &settings);
        assert_eq!(push.user_id, "me");
        assert_eq!(push.data["sound"], false);
        assert_eq!(push.data["messageIds"][0], "m1");
        assert_eq!(push.data["count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_markers_expire() {
        let mut dedup = DedupSet::new(Duration::from_secs(120));
        dedup.mark("m1");
        assert!(dedup.contains("m1"));

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(dedup.contains("m1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!dedup.contains("m1"));
    }

    #[test]
    fn unmark_releases_a_reservation() {
        let mut dedup = DedupSet::new(Duration::from_secs(120));
        dedup.mark("m1");
        dedup.unmark("m1");
        assert!(!dedup.contains("m1"));
    }

    #[tokio::test]
    async fn buffer_drops_single_message() {
        let mut buffer = NotificationBuffer::new(incoming("m1", MediaKind::Photo, None));
        buffer.messages.push(incoming("m2", MediaKind::Photo, None));
        assert!(buffer.remove_message("m1"));
        assert!(!buffer.remove_message("m1"));
        assert_eq!(buffer.messages.len(), 1);
        assert_eq!(buffer.messages[0].message_id, "m2");
    }
}
