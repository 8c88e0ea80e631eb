//! SQLite schema for the local durable store.
//!
//! The store is the source of truth: commits and their events, the live
//! catalog as JSON documents keyed by `(collection, key)`, and a small `meta`
//! table for counters that must survive restarts.

/// Core tables: commits, events, catalog documents, meta.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS commits (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_id   TEXT NOT NULL UNIQUE,
    ts          INTEGER NOT NULL,
    summary     TEXT NOT NULL,
    weight      INTEGER NOT NULL,
    size_bytes  INTEGER NOT NULL,
    counts      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_commits_ts ON commits(ts DESC);

CREATE TABLE IF NOT EXISTS events (
    event_id    TEXT PRIMARY KEY,
    commit_id   TEXT NOT NULL REFERENCES commits(commit_id) ON DELETE CASCADE,
    seq         INTEGER NOT NULL,
    ts          INTEGER NOT NULL,
    kind        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    impact      TEXT NOT NULL,
    size_bytes  INTEGER NOT NULL,
    inverse     TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_commit ON events(commit_id, seq);

CREATE TABLE IF NOT EXISTS catalog_docs (
    collection  TEXT NOT NULL,
    key         TEXT NOT NULL,
    position    INTEGER NOT NULL DEFAULT 0,
    doc         TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);

CREATE INDEX IF NOT EXISTS idx_catalog_docs_order ON catalog_docs(collection, position);

CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

/// Remote sync tracking for reconciliation.
pub const MIGRATION_V2_SQL: &str = r"
ALTER TABLE commits ADD COLUMN synced INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_commits_unsynced ON commits(synced, seq);
";

/// Indexes that must exist after the latest migration.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_commits_ts",
    "idx_events_commit",
    "idx_catalog_docs_order",
    "idx_commits_unsynced",
];
