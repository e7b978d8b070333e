//! Generic single-document records.
//!
//! Each persisted layout that is "one record" (the delivery queue, the push
//! token, the health history, the notification settings, the last signed-in
//! user) lives as one JSON row in `kv_records`, keyed by one of the constants below.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::Database;
use crate::error::Result;

pub const KEY_DELIVERY_QUEUE: &str = "delivery_queue";
pub const KEY_PUSH_TOKEN: &str = "push_token";
pub const KEY_HEALTH_HISTORY: &str = "health_history";
pub const KEY_NOTIFICATION_SETTINGS: &str = "notification_settings";
pub const KEY_LAST_USER: &str = "last_user";

impl Database {
    /// Read and decode the record stored under `key`, if any.
    pub fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT json FROM kv_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Encode `value` and store it under `key`, replacing any previous value.
    pub fn put_record<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO kv_records (key, json, updated_at) VALUES (?1, ?2, ?3)",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove the record under `key`.  Returns whether a row was deleted.
    pub fn delete_record(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM kv_records WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}
