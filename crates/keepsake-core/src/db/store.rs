//! Typed access to the local durable store.
//!
//! A single [`LocalStore`] owns the SQLite connection behind a mutex. Every
//! multi-row write goes through one transaction: a commit is inserted with
//! all of its events or not at all, and catalog groups are replaced through
//! [`LocalStore::transaction`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{StoreError, configure_connection, migrations};
use crate::catalog::{CatalogItem, CatalogState, Collection, PendingItem, RulePreset, Tag, TagGroup};
use crate::event::{Commit, CommitCounts, Event, EventKind, Impact};

const META_WEIGHT_SINCE_SNAPSHOT: &str = "checkpoint.weight_since_snapshot";
const META_MONTH_LOG_BYTES: &str = "checkpoint.current_month_log_bytes";

/// Document collections making up the live catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogCollection {
    Tags,
    TagGroups,
    RulePresets,
    Items,
    Collections,
    Pending,
}

impl CatalogCollection {
    pub const ALL: [Self; 6] = [
        Self::Tags,
        Self::TagGroups,
        Self::RulePresets,
        Self::Items,
        Self::Collections,
        Self::Pending,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::TagGroups => "tag_groups",
            Self::RulePresets => "rule_presets",
            Self::Items => "items",
            Self::Collections => "collections",
            Self::Pending => "pending",
        }
    }
}

/// Checkpoint policy counters persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointCounters {
    pub weight_since_snapshot: u64,
    pub current_month_log_bytes: u64,
}

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) the store at `path`, apply runtime pragmas, and
    /// migrate the schema to the latest version.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or opening,
    /// configuring, or migrating the database fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Prepare {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if configuring or migrating the database fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        configure_connection(&conn)?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the underlying connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn())
    }

    // -----------------------------------------------------------------------
    // Commits and events
    // -----------------------------------------------------------------------

    /// Insert a commit and all of its events in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is written in that case.
    pub fn persist_commit(&self, commit: &Commit, events: &[Event]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_commit(&tx, commit, false)?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert a commit recovered from an archive, already marked synced.
    ///
    /// Returns `false` without writing when the commit id is already present.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is written in that case.
    pub fn import_commit(&self, commit: &Commit, events: &[Event]) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM commits WHERE commit_id = ?1)",
            [&commit.commit_id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        insert_commit(&tx, commit, true)?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub fn get_commit(&self, commit_id: &str) -> Result<Option<Commit>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE commit_id = ?1"),
                [commit_id],
                read_commit_row,
            )
            .optional()?;
        row.map(CommitRow::into_commit).transpose()
    }

    /// Most recent commits first (by timestamp, then local insertion order).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub fn list_commits(&self, limit: usize) -> Result<Vec<Commit>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits ORDER BY ts DESC, seq DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], read_commit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CommitRow::into_commit).collect()
    }

    /// Events of one commit in recording order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub fn commit_events(&self, commit_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_id, commit_id, seq, ts, kind, payload, impact, size_bytes, inverse
             FROM events WHERE commit_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([commit_id], read_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Commits not yet mirrored remotely, in local insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub fn unsynced_commits(&self) -> Result<Vec<Commit>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE synced = 0 ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map([], read_commit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CommitRow::into_commit).collect()
    }

    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_synced(&self, commit_ids: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE commits SET synced = 1 WHERE commit_id = ?1")?;
            for id in commit_ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// `commit_id` and every commit ordered before it, oldest first. Empty
    /// when the commit is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub fn commits_through(&self, commit_id: &str) -> Result<Vec<Commit>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits, (SELECT ts AS t, seq AS s FROM commits WHERE commit_id = ?1)
             WHERE ts < t OR (ts = t AND seq <= s)
             ORDER BY ts, seq"
        ))?;
        let rows = stmt
            .query_map([commit_id], read_commit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CommitRow::into_commit).collect()
    }

    /// Delete `commit_id` and every commit ordered before it, with their
    /// events. Returns the number of commits removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails; nothing is removed in that case.
    pub fn delete_history_through(&self, commit_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let target: Option<(i64, i64)> = tx
            .query_row(
                "SELECT ts, seq FROM commits WHERE commit_id = ?1",
                [commit_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((ts, seq)) = target else {
            return Ok(0);
        };

        let range = "SELECT commit_id FROM commits WHERE ts < ?1 OR (ts = ?1 AND seq <= ?2)";
        tx.execute(
            &format!("DELETE FROM events WHERE commit_id IN ({range})"),
            params![ts, seq],
        )?;
        let removed = tx.execute(
            "DELETE FROM commits WHERE ts < ?1 OR (ts = ?1 AND seq <= ?2)",
            params![ts, seq],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Meta and counters
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_counters(&self) -> Result<CheckpointCounters, StoreError> {
        let read = |key| -> Result<u64, StoreError> {
            Ok(self
                .get_meta(key)?
                .and_then(|v| v.parse().ok())
                .unwrap_or_default())
        };
        Ok(CheckpointCounters {
            weight_since_snapshot: read(META_WEIGHT_SINCE_SNAPSHOT)?,
            current_month_log_bytes: read(META_MONTH_LOG_BYTES)?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_counters(&self, counters: CheckpointCounters) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (key, value) in [
            (META_WEIGHT_SINCE_SNAPSHOT, counters.weight_since_snapshot),
            (META_MONTH_LOG_BYTES, counters.current_month_log_bytes),
        ] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Catalog documents
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the query fails or the document is not JSON.
    pub fn get_doc(
        &self,
        collection: CatalogCollection,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT doc FROM catalog_docs WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| decode(collection.as_str(), &r)).transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_doc<T: Serialize>(
        &self,
        collection: CatalogCollection,
        key: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        self.transaction(|tx| tx.put(collection, key, doc))
    }

    /// Returns whether a document was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_doc(&self, collection: CatalogCollection, key: &str) -> Result<bool, StoreError> {
        self.transaction(|tx| tx.delete(collection, key))
    }

    /// Run `f` inside one write transaction; rolled back if `f` fails.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from committing.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&CatalogTx<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let out = f(&CatalogTx { tx: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    /// Read the whole live catalog inside a single read transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails or a document is corrupt.
    pub fn read_catalog(&self) -> Result<CatalogState, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let state = CatalogState {
            tags: read_collection::<Tag>(&tx, CatalogCollection::Tags)?,
            tag_groups: read_collection::<TagGroup>(&tx, CatalogCollection::TagGroups)?,
            rule_presets: read_collection::<RulePreset>(&tx, CatalogCollection::RulePresets)?,
            items: read_collection::<CatalogItem>(&tx, CatalogCollection::Items)?,
            collections: read_collection::<Collection>(&tx, CatalogCollection::Collections)?,
            pending: read_collection::<PendingItem>(&tx, CatalogCollection::Pending)?,
        };
        tx.commit()?;
        Ok(state)
    }

    /// Replace the entire live catalog with `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; nothing changes in that case.
    pub fn write_catalog(&self, state: &CatalogState) -> Result<(), StoreError> {
        self.transaction(|tx| {
            tx.replace_all(CatalogCollection::Tags, &state.tags, |t| &t.name)?;
            tx.replace_all(CatalogCollection::TagGroups, &state.tag_groups, |g| &g.id)?;
            tx.replace_all(CatalogCollection::RulePresets, &state.rule_presets, |p| &p.id)?;
            tx.replace_all(CatalogCollection::Items, &state.items, |i| &i.id)?;
            tx.replace_all(CatalogCollection::Collections, &state.collections, |c| &c.id)?;
            tx.replace_all(CatalogCollection::Pending, &state.pending, |p| &p.key)
        })
    }
}

/// Catalog writes scoped to one transaction.
pub struct CatalogTx<'a> {
    tx: &'a Transaction<'a>,
}

impl CatalogTx<'_> {
    /// Insert or replace one document. New keys go to the end of the
    /// collection's order; existing keys keep their position.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn put<T: Serialize>(
        &self,
        collection: CatalogCollection,
        key: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        let json = encode(collection.as_str(), doc)?;
        self.tx.execute(
            "INSERT INTO catalog_docs (collection, key, position, doc)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM catalog_docs WHERE collection = ?1),
                     ?3)
             ON CONFLICT(collection, key) DO UPDATE SET doc = excluded.doc",
            params![collection.as_str(), key, json],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, collection: CatalogCollection, key: &str) -> Result<bool, StoreError> {
        let removed = self.tx.execute(
            "DELETE FROM catalog_docs WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;
        Ok(removed > 0)
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self, collection: CatalogCollection) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "DELETE FROM catalog_docs WHERE collection = ?1",
            [collection.as_str()],
        )?)
    }

    /// Clear `collection` and insert `docs` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    pub fn replace_all<T: Serialize>(
        &self,
        collection: CatalogCollection,
        docs: &[T],
        key: impl Fn(&T) -> &String,
    ) -> Result<(), StoreError> {
        self.clear(collection)?;
        let mut stmt = self.tx.prepare(
            "INSERT OR REPLACE INTO catalog_docs (collection, key, position, doc)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, doc) in docs.iter().enumerate() {
            let json = encode(collection.as_str(), doc)?;
            stmt.execute(params![
                collection.as_str(),
                key(doc),
                i64::try_from(position).unwrap_or(i64::MAX),
                json
            ])?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const COMMIT_COLUMNS: &str = "commit_id, ts, summary, weight, size_bytes, counts";

struct CommitRow {
    commit_id: String,
    ts: i64,
    summary: String,
    weight: i64,
    size_bytes: i64,
    counts: String,
}

impl CommitRow {
    fn into_commit(self) -> Result<Commit, StoreError> {
        let counts: CommitCounts = serde_json::from_str(&self.counts).map_err(|source| {
            StoreError::Corrupt {
                what: format!("counts of commit {}", self.commit_id),
                source,
            }
        })?;
        Ok(Commit {
            commit_id: self.commit_id,
            ts: self.ts,
            summary: self.summary,
            weight: from_sql_int(self.weight),
            size_bytes: from_sql_int(self.size_bytes),
            counts,
        })
    }
}

fn read_commit_row(row: &Row<'_>) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        commit_id: row.get(0)?,
        ts: row.get(1)?,
        summary: row.get(2)?,
        weight: row.get(3)?,
        size_bytes: row.get(4)?,
        counts: row.get(5)?,
    })
}

struct EventRow {
    id: String,
    commit_id: String,
    seq: i64,
    ts: i64,
    kind: String,
    payload: String,
    impact: String,
    size_bytes: i64,
    inverse: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<Event, StoreError> {
        let what = |field: &str| format!("{field} of event {}", self.id);
        let kind: EventKind = serde_json::from_value(Value::String(self.kind.clone()))
            .map_err(|source| StoreError::Corrupt {
                what: what("kind"),
                source,
            })?;
        let payload: Value = serde_json::from_str(&self.payload).map_err(|source| {
            StoreError::Corrupt {
                what: what("payload"),
                source,
            }
        })?;
        let impact: Impact = serde_json::from_str(&self.impact).map_err(|source| {
            StoreError::Corrupt {
                what: what("impact"),
                source,
            }
        })?;
        let inverse = self
            .inverse
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| StoreError::Corrupt {
                what: what("inverse"),
                source,
            })?;

        Ok(Event {
            seq: u32::try_from(self.seq).unwrap_or_default(),
            id: self.id,
            commit_id: self.commit_id,
            ts: self.ts,
            kind,
            payload,
            impact,
            size_bytes: from_sql_int(self.size_bytes),
            inverse,
        })
    }
}

fn read_event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        commit_id: row.get(1)?,
        seq: row.get(2)?,
        ts: row.get(3)?,
        kind: row.get(4)?,
        payload: row.get(5)?,
        impact: row.get(6)?,
        size_bytes: row.get(7)?,
        inverse: row.get(8)?,
    })
}

fn insert_commit(tx: &Transaction<'_>, commit: &Commit, synced: bool) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO commits (commit_id, ts, summary, weight, size_bytes, counts, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            commit.commit_id,
            commit.ts,
            commit.summary,
            to_sql_int(commit.weight),
            to_sql_int(commit.size_bytes),
            encode("commit counts", &commit.counts)?,
            synced,
        ],
    )?;
    Ok(())
}

fn insert_event(tx: &Transaction<'_>, event: &Event) -> Result<(), StoreError> {
    let inverse = event
        .inverse
        .as_ref()
        .map(|v| encode("event inverse", v))
        .transpose()?;
    tx.execute(
        "INSERT INTO events (event_id, commit_id, seq, ts, kind, payload, impact, size_bytes, inverse)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            event.commit_id,
            event.seq,
            event.ts,
            event.kind.as_str(),
            encode("event payload", &event.payload)?,
            encode("event impact", &event.impact)?,
            to_sql_int(event.size_bytes),
            inverse,
        ],
    )?;
    Ok(())
}

fn read_collection<T: DeserializeOwned>(
    tx: &Transaction<'_>,
    collection: CatalogCollection,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT doc FROM catalog_docs WHERE collection = ?1 ORDER BY position, key",
    )?;
    let raws = stmt
        .query_map([collection.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raws.iter().map(|raw| decode(collection.as_str(), raw)).collect()
}

fn encode<T: Serialize + ?Sized>(what: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
        what: what.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(what: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        what: what.to_string(),
        source,
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(commit_id: &str, seq: u32, ts: i64) -> Event {
        Event {
            id: Event::event_id(commit_id, seq),
            commit_id: commit_id.to_string(),
            seq,
            ts,
            kind: EventKind::TagCreate,
            payload: json!({"name": format!("tag-{seq}")}),
            impact: Impact {
                tags: 1,
                ..Impact::default()
            },
            size_bytes: 40,
            inverse: None,
        }
    }

    fn commit_with_events(commit_id: &str, ts: i64, n: u32) -> (Commit, Vec<Event>) {
        let events: Vec<Event> = (0..n).map(|seq| event(commit_id, seq, ts)).collect();
        let commit = Commit::from_events(commit_id, ts, u64::from(n), &events);
        (commit, events)
    }

    fn event_count(store: &LocalStore, commit_id: &str) -> i64 {
        store.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM events WHERE commit_id = ?1",
                [commit_id],
                |row| row.get(0),
            )
            .expect("count events")
        })
    }

    #[test]
    fn persist_and_read_back_commit() {
        let store = LocalStore::open_in_memory().expect("open");
        let (commit, events) = commit_with_events("c1", 1_000, 3);
        store.persist_commit(&commit, &events).expect("persist");

        assert_eq!(store.get_commit("c1").expect("get"), Some(commit));
        let read = store.commit_events("c1").expect("events");
        assert_eq!(read, events);
        assert_eq!(read[2].id, "c1:2");
        assert!(store.get_commit("missing").expect("get").is_none());
    }

    #[test]
    fn commit_is_all_or_nothing_under_simulated_crash() {
        let store = LocalStore::open_in_memory().expect("open");
        for crash_at in 0..4 {
            store.with_connection(|conn| {
                conn.execute_batch(&format!(
                    "DROP TRIGGER IF EXISTS crash;
                     CREATE TRIGGER crash BEFORE INSERT ON events
                     WHEN NEW.seq = {crash_at}
                     BEGIN SELECT RAISE(ABORT, 'simulated crash'); END;"
                ))
                .expect("install crash trigger");
            });

            let id = format!("crash-{crash_at}");
            let (commit, events) = commit_with_events(&id, 2_000, 4);
            assert!(store.persist_commit(&commit, &events).is_err());
            assert!(store.get_commit(&id).expect("get").is_none());
            assert_eq!(event_count(&store, &id), 0, "partial events for crash at {crash_at}");
        }
    }

    #[test]
    fn lists_newest_first_and_tracks_sync() {
        let store = LocalStore::open_in_memory().expect("open");
        for (id, ts) in [("a", 10), ("b", 30), ("c", 20)] {
            let (commit, events) = commit_with_events(id, ts, 1);
            store.persist_commit(&commit, &events).expect("persist");
        }

        let ids: Vec<String> = store
            .list_commits(2)
            .expect("list")
            .into_iter()
            .map(|c| c.commit_id)
            .collect();
        assert_eq!(ids, ["b", "c"]);

        store.mark_synced(&["a".to_string()]).expect("mark");
        let unsynced: Vec<String> = store
            .unsynced_commits()
            .expect("unsynced")
            .into_iter()
            .map(|c| c.commit_id)
            .collect();
        assert_eq!(unsynced, ["b", "c"]);
    }

    #[test]
    fn delete_history_through_removes_older_commits_and_events() {
        let store = LocalStore::open_in_memory().expect("open");
        for (id, ts) in [("a", 10), ("b", 20), ("c", 20), ("d", 30)] {
            let (commit, events) = commit_with_events(id, ts, 2);
            store.persist_commit(&commit, &events).expect("persist");
        }

        let through: Vec<String> = store
            .commits_through("b")
            .expect("through")
            .into_iter()
            .map(|c| c.commit_id)
            .collect();
        assert_eq!(through, ["a", "b"]);
        assert!(store.commits_through("nope").expect("unknown").is_empty());

        assert_eq!(store.delete_history_through("b").expect("delete"), 2);
        assert!(store.get_commit("a").expect("get").is_none());
        assert!(store.get_commit("b").expect("get").is_none());
        assert!(store.get_commit("c").expect("get").is_some());
        assert_eq!(event_count(&store, "a"), 0);
        assert_eq!(event_count(&store, "c"), 2);
        assert_eq!(store.delete_history_through("nope").expect("noop"), 0);
    }

    #[test]
    fn import_skips_existing_commits() {
        let store = LocalStore::open_in_memory().expect("open");
        let (commit, events) = commit_with_events("old", 5, 2);
        assert!(store.import_commit(&commit, &events).expect("import"));
        assert!(!store.import_commit(&commit, &events).expect("reimport"));
        assert!(store.unsynced_commits().expect("unsynced").is_empty());
        assert_eq!(event_count(&store, "old"), 2);
    }

    #[test]
    fn counters_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.sqlite3");
        let counters = CheckpointCounters {
            weight_since_snapshot: 9_876,
            current_month_log_bytes: 1_234,
        };
        LocalStore::open(&path)
            .expect("open")
            .save_counters(counters)
            .expect("save");
        let reopened = LocalStore::open(&path).expect("reopen");
        assert_eq!(reopened.load_counters().expect("load"), counters);
    }

    #[test]
    fn catalog_round_trips_in_order() {
        let store = LocalStore::open_in_memory().expect("open");
        let state = CatalogState {
            tags: vec![Tag::named("zeta"), Tag::named("alpha")],
            items: vec![CatalogItem::new("v2"), CatalogItem::new("v1")],
            ..CatalogState::default()
        };
        store.write_catalog(&state).expect("write");
        assert_eq!(store.read_catalog().expect("read"), state);

        store
            .put_doc(CatalogCollection::Tags, "beta", &Tag::named("beta"))
            .expect("put");
        let names: Vec<String> = store
            .read_catalog()
            .expect("read")
            .tags
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["zeta", "alpha", "beta"]);

        assert!(store.delete_doc(CatalogCollection::Tags, "zeta").expect("delete"));
        assert!(store.get_doc(CatalogCollection::Tags, "zeta").expect("get").is_none());
        assert_eq!(
            store.get_doc(CatalogCollection::Tags, "beta").expect("get"),
            Some(json!({"name": "beta"}))
        );
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = LocalStore::open_in_memory().expect("open");
        let result: Result<(), StoreError> = store.transaction(|tx| {
            tx.put(CatalogCollection::Tags, "a", &Tag::named("a"))?;
            Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(result.is_err());
        assert!(store.read_catalog().expect("read").tags.is_empty());
    }
}
