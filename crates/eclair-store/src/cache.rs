//! CRUD operations for [`CachedRecord`] snapshots.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::CachedRecord;

impl Database {
    /// Insert or replace a snapshot.
    pub fn upsert_cache_entry(&self, record: &CachedRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO cache_entries (key, json, last_updated_at, ttl_ms, stale)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key,
                serde_json::to_string(&record.payload)?,
                record.last_updated_at.to_rfc3339(),
                record.ttl_ms as i64,
                record.stale as i32,
            ],
        )?;
        Ok(())
    }

    /// Every persisted snapshot.
    pub fn load_cache_entries(&self) -> Result<Vec<CachedRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT key, json, last_updated_at, ttl_ms, stale
             FROM cache_entries",
        )?;

        let rows = stmt.query_map([], row_to_cached_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Flag one snapshot stale.  Returns whether it existed.
    pub fn mark_cache_stale(&self, key: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE cache_entries SET stale = 1 WHERE key = ?1",
            params![key],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_cache_stale(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("UPDATE cache_entries SET stale = 1", [])?)
    }

    pub fn delete_cache_entry(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// Drop every snapshot, e.g. on account switch.
    pub fn clear_cache_entries(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM cache_entries", [])?)
    }
}

fn row_to_cached_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedRecord> {
    let key: String = row.get(0)?;
    let json: String = row.get(1)?;
    let ts_str: String = row.get(2)?;
    let ttl_ms: i64 = row.get(3)?;
    let stale_int: i32 = row.get(4)?;

    let payload: serde_json::Value = serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CachedRecord {
        key,
        payload,
        last_updated_at,
        ttl_ms: ttl_ms.max(0) as u64,
        stale: stale_int != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> CachedRecord {
        CachedRecord {
            key: key.into(),
            payload: serde_json::json!({ "key": key, "messages": [1, 2] }),
            last_updated_at: Utc::now(),
            ttl_ms: 60_000,
            stale: false,
        }
    }

    #[test]
    fn cache_upsert_and_load() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cache_entry(&record("conversation:u1")).unwrap();
        db.upsert_cache_entry(&record("conversation:u2")).unwrap();
        db.upsert_cache_entry(&record("conversation:u1")).unwrap();

        let mut loaded = db.load_cache_entries().unwrap();
        loaded.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].payload["key"], "conversation:u1");
        assert!(!loaded[0].stale);
    }

    #[test]
    fn cache_stale_flags() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cache_entry(&record("a")).unwrap();
        db.upsert_cache_entry(&record("b")).unwrap();

        assert!(db.mark_cache_stale("a").unwrap());
        assert!(!db.mark_cache_stale("missing").unwrap());

        let stale: Vec<_> = db
            .load_cache_entries()
            .unwrap()
            .into_iter()
            .filter(|r| r.stale)
            .map(|r| r.key)
            .collect();
        assert_eq!(stale, vec!["a".to_string()]);

        assert_eq!(db.mark_all_cache_stale().unwrap(), 2);
        assert!(db.delete_cache_entry("a").unwrap());
        assert_eq!(db.clear_cache_entries().unwrap(), 1);
    }
}
