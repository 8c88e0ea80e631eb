//! The history API: one owned handle wiring the local store, the remote,
//! the batcher, and the replay, restore, and prune engines together.
//!
//! Background paths (`tick`, the remote half of `flush`) log their failures.
//! User-initiated operations return them.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::batcher::{CommitBatcher, FlushOutcome, ReconcileOutcome};
use crate::checkpoint::{self, CheckpointPolicy};
use crate::clock::{Clock, IdSource};
use crate::db::LocalStore;
use crate::error::HistoryError;
use crate::event::{Commit, Event, EventKind, Impact, Mutation};
use crate::prune::{self, HistoryBundle, PruneReport, ReattachReport};
use crate::remote::BlobStore;
use crate::replay::{self, ReplayReport, WorkingState};
use crate::restore::{
    self, ApplyFlags, RestoreInput, RestoreMode, RestoreOptions, RestoreSummary,
};
use crate::snapshot::{self, Snapshot, SnapshotProducer, StoreSnapshots};

/// Options for [`History::revert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertOptions {
    /// Write the reconstruction into the live catalog. A dry run only counts.
    pub apply: bool,
    pub flags: ApplyFlags,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertOutcome {
    pub commit: Commit,
    pub replay: ReplayReport,
    pub summary: RestoreSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub name: String,
    pub at: i64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub snapshot: String,
    /// Commits pushed to the remote before the snapshot was written.
    pub synced: Vec<String>,
}

pub struct History {
    store: Arc<LocalStore>,
    remote: Arc<dyn BlobStore>,
    producer: Arc<dyn SnapshotProducer>,
    clock: Arc<dyn Clock>,
    batcher: CommitBatcher,
}

impl History {
    /// History over `store` and `remote`, snapshotting the live catalog held
    /// in `store`.
    #[must_use]
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        policy: CheckpointPolicy,
    ) -> Self {
        let producer: Arc<dyn SnapshotProducer> =
            Arc::new(StoreSnapshots::new(store.clone(), clock.clone()));
        Self::with_producer(store, remote, producer, clock, ids, policy)
    }

    #[must_use]
    pub fn with_producer(
        store: Arc<LocalStore>,
        remote: Arc<dyn BlobStore>,
        producer: Arc<dyn SnapshotProducer>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        policy: CheckpointPolicy,
    ) -> Self {
        let batcher = CommitBatcher::new(
            store.clone(),
            remote.clone(),
            producer.clone(),
            clock.clone(),
            ids,
            policy,
        );
        Self {
            store,
            remote,
            producer,
            clock,
            batcher,
        }
    }

    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Buffer a mutation the caller has already applied to the live catalog.
    pub fn record_event(&self, kind: EventKind, payload: Value, impact: Impact) -> String {
        self.batcher.record_event(kind, payload, impact)
    }

    /// Apply a mutation to the live catalog and record it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit `kind` or the live
    /// catalog cannot be read or written.
    pub fn apply_event(
        &self,
        kind: EventKind,
        payload: Value,
        impact: Impact,
    ) -> Result<String, HistoryError> {
        if let Some(mutation) = Mutation::parse(kind, &payload)? {
            let mut state = WorkingState::from_state(self.store.read_catalog()?);
            state.apply(mutation);
            self.store.write_catalog(&state.to_state())?;
        }
        Ok(self.record_event(kind, payload, impact))
    }

    pub fn queue_flush(&self, delay_ms: u64) {
        self.batcher.queue_flush(delay_ms);
    }

    pub fn tick(&self) -> Option<FlushOutcome> {
        self.batcher.tick()
    }

    /// # Errors
    ///
    /// Returns an error if the local transaction fails.
    pub fn flush(&self) -> Result<Option<FlushOutcome>, HistoryError> {
        self.batcher.flush()
    }

    pub fn reconcile(&self) -> ReconcileOutcome {
        self.batcher.reconcile()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.batcher.pending_len()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn list_commits(&self, limit: usize) -> Result<Vec<Commit>, HistoryError> {
        Ok(self.store.list_commits(limit)?)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::CommitNotFound`] for an unknown commit.
    pub fn get_commit_events(&self, commit_id: &str) -> Result<Vec<Event>, HistoryError> {
        if self.store.get_commit(commit_id)?.is_none() {
            return Err(HistoryError::CommitNotFound(commit_id.to_string()));
        }
        Ok(self.store.commit_events(commit_id)?)
    }

    /// Remote snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be listed.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, HistoryError> {
        Ok(snapshot::snapshots_in(&self.remote.list()?)
            .into_iter()
            .map(|s| SnapshotInfo {
                name: s.blob.name,
                at: s.at,
                size: s.blob.size,
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Point-in-time recovery
    // -----------------------------------------------------------------------

    /// Reconstruct the catalog as of `commit_id` and either count the
    /// differences from the live catalog or write it back.
    ///
    /// # Errors
    ///
    /// Unsynced commits are pushed first; a remote that rejects them fails
    /// the revert before anything is read. See [`replay::reconstruct`] for
    /// the remaining errors. An applied revert also fails if its audit commit
    /// or its post-apply snapshot cannot be written.
    pub fn revert(
        &self,
        commit_id: &str,
        options: RevertOptions,
    ) -> Result<RevertOutcome, HistoryError> {
        self.push_through(commit_id)?;
        let reconstruction = replay::reconstruct(&self.store, self.remote.as_ref(), commit_id)?;
        let input = RestoreInput {
            state: reconstruction.state.to_state(),
            remove_items: reconstruction.state.archived_items.keys().cloned().collect(),
            remove_collections: reconstruction
                .state
                .archived_collections
                .keys()
                .cloned()
                .collect(),
            replace_pending: true,
        };
        let summary = restore::restore(
            &self.store,
            &input,
            &RestoreOptions {
                mode: RestoreMode::Overwrite,
                flags: options.flags,
                dry_run: !options.apply,
            },
        )?;

        if options.apply {
            let snapshot = self.record_import(
                json!({"source": "revert", "commitId": reconstruction.commit.commit_id}),
                &summary,
            )?;
            info!(commit = %reconstruction.commit.commit_id, %snapshot, "reverted catalog");
        }

        Ok(RevertOutcome {
            commit: reconstruction.commit,
            replay: reconstruction.report,
            summary,
        })
    }

    /// Restore the named remote snapshot into the live catalog.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::SnapshotNotFound`] for an unknown name, or a
    /// snapshot error for an unsupported version; nothing is written in
    /// either case.
    pub fn restore_snapshot(
        &self,
        name: &str,
        options: RestoreOptions,
    ) -> Result<RestoreSummary, HistoryError> {
        let id = self
            .remote
            .find_by_name(name)?
            .ok_or_else(|| HistoryError::SnapshotNotFound(name.to_string()))?;
        let snapshot = Snapshot::decode(&self.remote.read(&id)?)?;
        let input = RestoreInput::snapshot(snapshot.into_state(), options.mode);
        let summary = restore::restore(&self.store, &input, &options)?;

        if !options.dry_run {
            self.record_import(json!({"source": "snapshot", "name": name}), &summary)?;
        }
        Ok(summary)
    }

    /// Seal an audit commit for an applied restore, then snapshot the result.
    /// `snapshot.import` lines carry no mutation, so later replays must start
    /// from the post-apply snapshot rather than an older baseline.
    fn record_import(
        &self,
        payload: Value,
        summary: &RestoreSummary,
    ) -> Result<String, HistoryError> {
        let impact = Impact {
            items: summary.items.total() as u64,
            collections: summary.collections.total() as u64,
            tags: summary.tags.total() as u64,
            groups: summary.tag_groups.total() as u64,
        };
        self.record_event(EventKind::SnapshotImport, payload, impact);
        self.flush()?;
        checkpoint::write_snapshot(&self.store, self.remote.as_ref(), self.producer.as_ref())
    }

    // -----------------------------------------------------------------------
    // Backup, prune, export, reattach
    // -----------------------------------------------------------------------

    /// Push unsynced commits, then write a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns the sync failure if commits could not be pushed, or the
    /// snapshot error.
    pub fn backup(&self) -> Result<BackupOutcome, HistoryError> {
        self.flush()?;
        let reconciled = self.reconcile();
        if let Some(err) = reconciled.sync.failure {
            return Err(err);
        }
        let name = checkpoint::write_snapshot(&self.store, self.remote.as_ref(), self.producer.as_ref())?;
        Ok(BackupOutcome {
            snapshot: name,
            synced: reconciled.sync.pushed,
        })
    }

    /// Delete history up to and including `commit_id`, locally and remotely.
    ///
    /// # Errors
    ///
    /// See [`prune::prune`].
    pub fn prune(&self, commit_id: &str) -> Result<PruneReport, HistoryError> {
        self.push_through(commit_id)?;
        prune::prune(&self.store, self.remote.as_ref(), commit_id, self.clock.now_ms())
    }

    /// # Errors
    ///
    /// See [`prune::export_up_to`].
    pub fn export_up_to(&self, commit_id: &str) -> Result<HistoryBundle, HistoryError> {
        self.push_through(commit_id)?;
        prune::export_up_to(&self.store, self.remote.as_ref(), commit_id, self.clock.now_ms())
    }

    /// # Errors
    ///
    /// See [`prune::reattach`].
    pub fn reattach(&self, bundle: &HistoryBundle) -> Result<ReattachReport, HistoryError> {
        prune::reattach(&self.store, self.remote.as_ref(), bundle)
    }

    /// Revert, prune, and export read or cut the remote logs, which must
    /// hold every local commit first. An unknown commit fails before anything
    /// is pushed.
    fn push_through(&self, commit_id: &str) -> Result<(), HistoryError> {
        if self.store.get_commit(commit_id)?.is_none() {
            return Err(HistoryError::CommitNotFound(commit_id.to_string()));
        }
        match self.reconcile().sync.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
