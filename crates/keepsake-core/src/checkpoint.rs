//! When to write a fresh full snapshot.
//!
//! After each remote append the accumulated commit weight and the current
//! month's log size are compared against thresholds. Crossing either one
//! writes a snapshot and resets the weight counter. The size counter tracks
//! the live log and is never reset here.

use tracing::{info, warn};

use crate::db::{CheckpointCounters, LocalStore};
use crate::error::HistoryError;
use crate::remote::BlobStore;
use crate::snapshot::{Snapshot, SnapshotProducer};
use crate::sync::SyncOutcome;

pub const DEFAULT_WEIGHT_THRESHOLD: u64 = 10_000;
pub const DEFAULT_LOG_SIZE_THRESHOLD: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    pub weight_threshold: u64,
    pub log_size_threshold: u64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            weight_threshold: DEFAULT_WEIGHT_THRESHOLD,
            log_size_threshold: DEFAULT_LOG_SIZE_THRESHOLD,
        }
    }
}

impl CheckpointPolicy {
    /// Fold a sync pass into `counters`.
    pub fn observe(counters: &mut CheckpointCounters, outcome: &SyncOutcome) {
        counters.weight_since_snapshot += outcome.weight;
        if let Some(bytes) = outcome.month_log_bytes {
            counters.current_month_log_bytes = bytes;
        }
    }

    #[must_use]
    pub const fn is_due(&self, counters: &CheckpointCounters) -> bool {
        counters.weight_since_snapshot >= self.weight_threshold
            || counters.current_month_log_bytes >= self.log_size_threshold
    }

    /// Update the persisted counters after a sync pass and write a snapshot
    /// when a threshold is crossed. Returns the snapshot name if one was
    /// written.
    ///
    /// # Errors
    ///
    /// Returns an error if the counters cannot be persisted or the snapshot
    /// cannot be produced or uploaded. The appended logs are unaffected.
    pub fn after_sync(
        &self,
        store: &LocalStore,
        remote: &dyn BlobStore,
        producer: &dyn SnapshotProducer,
        outcome: &SyncOutcome,
    ) -> Result<Option<String>, HistoryError> {
        if outcome.pushed.is_empty() {
            return Ok(None);
        }

        let mut counters = store.load_counters()?;
        Self::observe(&mut counters, outcome);
        store.save_counters(counters)?;

        if !self.is_due(&counters) {
            return Ok(None);
        }

        info!(
            weight = counters.weight_since_snapshot,
            log_bytes = counters.current_month_log_bytes,
            "checkpoint threshold crossed"
        );
        let name = write_snapshot(store, remote, producer)?;
        Ok(Some(name))
    }
}

/// Produce and upload a snapshot, then reset the weight counter.
///
/// # Errors
///
/// Returns an error if producing, uploading, or resetting fails.
pub fn write_snapshot(
    store: &LocalStore,
    remote: &dyn BlobStore,
    producer: &dyn SnapshotProducer,
) -> Result<String, HistoryError> {
    let snapshot: Snapshot = producer.produce()?;
    let name = snapshot.blob_name();
    remote.create_or_replace(&name, &snapshot.encode()?)?;

    let mut counters = store.load_counters()?;
    counters.weight_since_snapshot = 0;
    if let Err(err) = store.save_counters(counters) {
        warn!(snapshot = %name, error = %err, "snapshot written but counter reset failed");
        return Err(err.into());
    }

    info!(snapshot = %name, "wrote snapshot");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MemoryBlobStore;
    use crate::snapshot::{SnapshotError, is_snapshot_name};
    use std::sync::Arc;

    struct EmptyCatalog;

    impl SnapshotProducer for EmptyCatalog {
        fn produce(&self) -> Result<Snapshot, SnapshotError> {
            Ok(Snapshot::from_state(crate::catalog::CatalogState::default(), 42))
        }
    }

    fn pushed(weight: u64, bytes: u64) -> SyncOutcome {
        SyncOutcome {
            pushed: vec!["c".to_string()],
            weight,
            month_log_bytes: Some(bytes),
            failure: None,
        }
    }

    fn snapshot_count(remote: &MemoryBlobStore) -> usize {
        remote.names().iter().filter(|n| is_snapshot_name(n)).count()
    }

    #[test]
    fn weight_threshold_writes_one_snapshot_and_resets() {
        let store = LocalStore::open_in_memory().expect("open");
        let remote = MemoryBlobStore::new(Arc::new(ManualClock::new(0)));
        let policy = CheckpointPolicy::default();

        let first = policy
            .after_sync(&store, &remote, &EmptyCatalog, &pushed(9_999, 100))
            .expect("below threshold");
        assert!(first.is_none());
        assert_eq!(snapshot_count(&remote), 0);

        let second = policy
            .after_sync(&store, &remote, &EmptyCatalog, &pushed(1, 120))
            .expect("crossing");
        assert_eq!(second.as_deref(), Some("snapshots/settings-42.json"));
        assert_eq!(snapshot_count(&remote), 1);

        let counters = store.load_counters().expect("counters");
        assert_eq!(counters.weight_since_snapshot, 0);
        assert_eq!(counters.current_month_log_bytes, 120);
    }

    #[test]
    fn size_threshold_triggers_without_weight() {
        let store = LocalStore::open_in_memory().expect("open");
        let remote = MemoryBlobStore::new(Arc::new(ManualClock::new(0)));
        let policy = CheckpointPolicy {
            weight_threshold: 10_000,
            log_size_threshold: 1_000,
        };

        let written = policy
            .after_sync(&store, &remote, &EmptyCatalog, &pushed(1, 1_000))
            .expect("checkpoint");
        assert!(written.is_some());
        // size counter follows the log, not the snapshot
        assert_eq!(
            store.load_counters().expect("counters").current_month_log_bytes,
            1_000
        );
    }

    #[test]
    fn failed_upload_keeps_weight_for_retry() {
        let store = LocalStore::open_in_memory().expect("open");
        let remote = MemoryBlobStore::new(Arc::new(ManualClock::new(0)));
        remote.set_fail_writes(true);
        let policy = CheckpointPolicy::default();

        assert!(
            policy
                .after_sync(&store, &remote, &EmptyCatalog, &pushed(10_000, 1))
                .is_err()
        );
        assert_eq!(
            store.load_counters().expect("counters").weight_since_snapshot,
            10_000
        );
    }

    #[test]
    fn empty_pass_changes_nothing() {
        let store = LocalStore::open_in_memory().expect("open");
        let remote = MemoryBlobStore::new(Arc::new(ManualClock::new(0)));
        let written = CheckpointPolicy::default()
            .after_sync(&store, &remote, &EmptyCatalog, &SyncOutcome::default())
            .expect("noop");
        assert!(written.is_none());
        assert_eq!(store.load_counters().expect("counters"), CheckpointCounters::default());
    }
}
