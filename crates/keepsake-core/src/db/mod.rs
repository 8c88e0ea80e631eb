//! Local durable store (SQLite).
//!
//! Runtime defaults follow the projection database conventions:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout = 5s` to ride out transient lock failures
//! - `foreign_keys = ON` so deleting a commit cascades to its events

pub mod migrations;
pub mod schema;
pub mod store;

pub use store::{CatalogCollection, CatalogTx, CheckpointCounters, LocalStore};

use rusqlite::Connection;
use std::path::PathBuf;
use std::{io, time::Duration};

/// Busy timeout used for local store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt {what} in local store: {source}")]
    Corrupt {
        what: String,
        source: serde_json::Error,
    },

    #[error("cannot prepare local store directory {}: {source}", path.display())]
    Prepare { path: PathBuf, source: io::Error },
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
