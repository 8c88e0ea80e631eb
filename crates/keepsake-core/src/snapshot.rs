//! Full-catalog snapshots and their remote naming.
//!
//! A snapshot is stored remotely as `snapshots/settings-<ts>.json`, where
//! `<ts>` is the capture time in milliseconds. The encoded time is the
//! snapshot's position in history: replay and prune compare it against commit
//! timestamps. Blobs whose name carries no time fall back to the blob's
//! modified time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogItem, CatalogState, Collection, PendingItem, RulePreset, Tag, TagGroup};
use crate::clock::Clock;
use crate::db::LocalStore;
use crate::remote::BlobMeta;

/// Snapshot schema version written and accepted by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_PREFIX: &str = "snapshots/settings-";
const SNAPSHOT_SUFFIX: &str = ".json";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("snapshot is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("snapshot producer failed: {0}")]
    Producer(String),
}

/// Checkpoint of the full catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    /// Capture time in milliseconds since the Unix epoch.
    pub at: i64,
    #[serde(default)]
    pub tag_registry: Vec<Tag>,
    #[serde(default)]
    pub tag_groups: Vec<TagGroup>,
    #[serde(default)]
    pub rule_presets: Vec<RulePreset>,
    #[serde(default)]
    pub item_index: Vec<CatalogItem>,
    #[serde(default)]
    pub collection_index: Vec<Collection>,
    #[serde(default)]
    pub pending_items: Vec<PendingItem>,
}

impl Snapshot {
    #[must_use]
    pub fn from_state(state: CatalogState, at: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            at,
            tag_registry: state.tags,
            tag_groups: state.tag_groups,
            rule_presets: state.rule_presets,
            item_index: state.items,
            collection_index: state.collections,
            pending_items: state.pending,
        }
    }

    #[must_use]
    pub fn into_state(self) -> CatalogState {
        CatalogState {
            tags: self.tag_registry,
            tag_groups: self.tag_groups,
            rule_presets: self.rule_presets,
            items: self.item_index,
            collections: self.collection_index,
            pending: self.pending_items,
        }
    }

    /// Decode and version-check a snapshot blob.
    ///
    /// The version is checked before the body is decoded so a future schema
    /// is reported as unsupported rather than as a parse failure.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsupportedVersion`] for any version other
    /// than [`SNAPSHOT_VERSION`], or [`SnapshotError::Decode`] for malformed
    /// JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            version: u32,
        }

        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        if probe.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: probe.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Remote blob name for this snapshot.
    #[must_use]
    pub fn blob_name(&self) -> String {
        snapshot_name(self.at)
    }
}

/// Returns a full, point-in-time-consistent snapshot of the live catalog.
pub trait SnapshotProducer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the live catalog cannot be read.
    fn produce(&self) -> Result<Snapshot, SnapshotError>;
}

/// Snapshots of the live catalog held in the local store.
pub struct StoreSnapshots {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
}

impl StoreSnapshots {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl SnapshotProducer for StoreSnapshots {
    fn produce(&self) -> Result<Snapshot, SnapshotError> {
        let state = self
            .store
            .read_catalog()
            .map_err(|e| SnapshotError::Producer(e.to_string()))?;
        Ok(Snapshot::from_state(state, self.clock.now_ms()))
    }
}

#[must_use]
pub fn snapshot_name(at: i64) -> String {
    format!("{SNAPSHOT_PREFIX}{at}{SNAPSHOT_SUFFIX}")
}

#[must_use]
pub fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX)
}

/// Capture time encoded in a snapshot name, if any.
#[must_use]
pub fn time_from_name(name: &str) -> Option<i64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse()
        .ok()
}

/// A snapshot blob located in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub blob: BlobMeta,
    /// Name-encoded capture time, or the blob's modified time.
    pub at: i64,
}

/// Snapshot blobs in `listing`, newest first.
#[must_use]
pub fn snapshots_in(listing: &[BlobMeta]) -> Vec<SnapshotRef> {
    let mut refs: Vec<SnapshotRef> = listing
        .iter()
        .filter(|blob| is_snapshot_name(&blob.name))
        .map(|blob| SnapshotRef {
            at: time_from_name(&blob.name).unwrap_or(blob.modified_time),
            blob: blob.clone(),
        })
        .collect();
    refs.sort_by(|a, b| b.at.cmp(&a.at).then_with(|| b.blob.name.cmp(&a.blob.name)));
    refs
}

/// The newest snapshot taken at or before `ts`.
#[must_use]
pub fn latest_at_or_before(listing: &[BlobMeta], ts: i64) -> Option<SnapshotRef> {
    snapshots_in(listing).into_iter().find(|s| s.at <= ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(name: &str, modified_time: i64) -> BlobMeta {
        BlobMeta {
            id: name.to_string(),
            name: name.to_string(),
            size: 10,
            modified_time,
        }
    }

    #[test]
    fn names_encode_capture_time() {
        let name = snapshot_name(1_700_000_000_123);
        assert_eq!(name, "snapshots/settings-1700000000123.json");
        assert!(is_snapshot_name(&name));
        assert_eq!(time_from_name(&name), Some(1_700_000_000_123));
        assert_eq!(time_from_name("events-2024-01.jsonl"), None);
    }

    #[test]
    fn picks_newest_snapshot_not_after_target() {
        let listing = vec![
            blob("snapshots/settings-100.json", 999),
            blob("snapshots/settings-300.json", 999),
            blob("events-1970-01.jsonl", 50),
            blob("snapshots/settings-200.json", 999),
        ];
        let chosen = latest_at_or_before(&listing, 250).expect("baseline");
        assert_eq!(chosen.at, 200);
        assert_eq!(latest_at_or_before(&listing, 300).map(|s| s.at), Some(300));
        assert!(latest_at_or_before(&listing, 99).is_none());
    }

    #[test]
    fn unparseable_names_fall_back_to_modified_time() {
        let listing = vec![blob("snapshots/settings-manual.json", 120)];
        assert_eq!(latest_at_or_before(&listing, 150).map(|s| s.at), Some(120));
    }

    #[test]
    fn decode_rejects_future_versions_before_parsing_body() {
        let raw = json!({"version": 2, "at": 5, "tagRegistry": "not-a-list"});
        let err = Snapshot::decode(raw.to_string().as_bytes()).expect_err("version 2");
        assert!(matches!(
            err,
            SnapshotError::UnsupportedVersion {
                found: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn store_producer_reads_live_catalog() {
        use crate::clock::ManualClock;

        let store = Arc::new(LocalStore::open_in_memory().expect("open"));
        store
            .write_catalog(&CatalogState {
                tags: vec![Tag::named("music")],
                ..CatalogState::default()
            })
            .expect("write");
        let producer = StoreSnapshots::new(store, Arc::new(ManualClock::new(77)));

        let snapshot = producer.produce().expect("produce");
        assert_eq!(snapshot.at, 77);
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.tag_registry, vec![Tag::named("music")]);
    }

    #[test]
    fn decode_fills_missing_sections() {
        let raw = json!({"version": 1, "at": 5, "tagRegistry": [{"name": "music"}]});
        let snapshot = Snapshot::decode(raw.to_string().as_bytes()).expect("decode");
        assert_eq!(snapshot.tag_registry, vec![Tag::named("music")]);
        assert!(snapshot.item_index.is_empty());
        assert_eq!(snapshot.blob_name(), "snapshots/settings-5.json");
    }
}
