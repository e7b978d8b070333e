//! # eclair-store
//!
//! Local storage for the Eclair delivery core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every persisted
//! record: the outbound delivery queue, the validated push token, the
//! rolling health-check history, notification settings and cache
//! snapshots.

pub mod cache;
pub mod database;
pub mod health;
pub mod migrations;
pub mod models;
pub mod push_token;
pub mod queue;
pub mod records;
pub mod session;
pub mod settings;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
