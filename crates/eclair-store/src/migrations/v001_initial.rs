//! v001 -- Initial schema creation.
//!
//! Creates `kv_records`, which holds one JSON document per single-record
//! layout (delivery queue, push token, health history, notification
//! settings), and `cache_entries` for cache snapshots.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Single-document records
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS kv_records (
    key        TEXT PRIMARY KEY NOT NULL,
    json       TEXT NOT NULL,
    updated_at TEXT NOT NULL              -- RFC-3339
);

-- ----------------------------------------------------------------
-- Cache snapshots
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cache_entries (
    key             TEXT PRIMARY KEY NOT NULL,
    json            TEXT NOT NULL,
    last_updated_at TEXT NOT NULL,        -- RFC-3339
    ttl_ms          INTEGER NOT NULL,
    stale           INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
