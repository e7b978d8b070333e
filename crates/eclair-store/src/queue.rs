//! Persistence of the outbound delivery queue.
//!
//! The whole queue is stored as one ordered JSON array so that a write is a
//! single atomic row replacement.

use crate::database::Database;
use crate::error::Result;
use crate::models::QueuedMessage;
use crate::records::KEY_DELIVERY_QUEUE;

impl Database {
    /// Load the persisted queue in enqueue order.  Empty when never saved.
    pub fn load_queue(&self) -> Result<Vec<QueuedMessage>> {
        Ok(self
            .get_record::<Vec<QueuedMessage>>(KEY_DELIVERY_QUEUE)?
            .unwrap_or_default())
    }

    /// Replace the persisted queue.
    pub fn save_queue(&self, entries: &[QueuedMessage]) -> Result<()> {
        self.put_record(KEY_DELIVERY_QUEUE, entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use eclair_shared::{MediaKind, VisibilityMode};

    use super::*;
    use crate::models::DeliveryStatus;

    fn entry(receiver: &str) -> QueuedMessage {
        QueuedMessage {
            temp_id: Uuid::new_v4(),
            receiver_id: receiver.into(),
            sender_id: "me".into(),
            local_media_ref: "file:///tmp/snap.jpg".into(),
            media_kind: MediaKind::Photo,
            size_bytes: 1024,
            visibility_mode: VisibilityMode::OneTime,
            caption_text: Some("salut".into()),
            status: DeliveryStatus::Queued,
            attempt: 0,
            created_at: Utc::now(),
            server_id: None,
            media_url: None,
            next_attempt_at: None,
            jitter: 0.5,
            last_error: None,
        }
    }

    #[test]
    fn queue_keeps_order_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let entries = vec![entry("u1"), entry("u2"), entry("u1")];

        {
            let db = Database::open_at(&path).unwrap();
            assert!(db.load_queue().unwrap().is_empty());
            db.save_queue(&entries).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let loaded = db.load_queue().unwrap();
        assert_eq!(loaded, entries);
    }
}
