//! Commit batching.
//!
//! Mutations are recorded into an in-memory buffer with no I/O. A flush seals
//! the buffer into one [`Commit`], persists it locally in a single
//! transaction, mirrors unsynced commits to the remote, and runs the
//! checkpoint policy.
//!
//! The pending buffer is swapped out under its mutex before any I/O starts,
//! so a flush that overlaps another sees an empty buffer and returns early.
//! The debounce timer is a single deadline checked by [`CommitBatcher::tick`].

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointPolicy;
use crate::clock::{Clock, IdSource};
use crate::db::LocalStore;
use crate::error::HistoryError;
use crate::event::{Commit, Event, EventKind, Impact, encoded_size, event_weight};
use crate::remote::BlobStore;
use crate::snapshot::SnapshotProducer;
use crate::sync::{self, SyncOutcome};

#[derive(Debug, Default)]
struct Pending {
    commit_id: Option<String>,
    events: Vec<Event>,
    weight: u64,
}

impl Pending {
    const fn is_empty(&self) -> bool {
        self.commit_id.is_none() || self.events.is_empty()
    }

    /// Put a batch that failed to persist back in front of newer events.
    ///
    /// Newer events are re-stamped onto the failed batch's commit id so the
    /// merged buffer is still one commit with contiguous sequence numbers.
    fn restore_front(&mut self, batch: Self) {
        let newer = mem::take(&mut self.events);
        let Some(commit_id) = batch.commit_id else {
            return;
        };
        let mut events = batch.events;
        for mut event in newer {
            let seq = u32::try_from(events.len()).unwrap_or(u32::MAX);
            event.seq = seq;
            event.id = Event::event_id(&commit_id, seq);
            event.commit_id.clone_from(&commit_id);
            events.push(event);
        }
        self.commit_id = Some(commit_id);
        self.events = events;
        self.weight += batch.weight;
    }
}

/// Result of a flush that sealed a commit.
#[derive(Debug)]
pub struct FlushOutcome {
    pub commit: Commit,
    /// Whether every unsynced commit reached the remote.
    pub synced: bool,
    /// Name of the snapshot written by the checkpoint policy, if any.
    pub snapshot: Option<String>,
}

/// Result of a remote reconciliation pass.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub sync: SyncOutcome,
    pub snapshot: Option<String>,
}

pub struct CommitBatcher {
    store: Arc<LocalStore>,
    remote: Arc<dyn BlobStore>,
    producer: Arc<dyn SnapshotProducer>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    policy: CheckpointPolicy,
    pending: Mutex<Pending>,
    deadline: Mutex<Option<i64>>,
}

impl CommitBatcher {
    #[must_use]
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn BlobStore>,
        producer: Arc<dyn SnapshotProducer>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            producer,
            clock,
            ids,
            policy,
            pending: Mutex::new(Pending::default()),
            deadline: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self) -> MutexGuard<'_, Option<i64>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one mutation. Never fails and performs no I/O.
    ///
    /// Returns the new event's id.
    pub fn record_event(&self, kind: EventKind, payload: Value, impact: Impact) -> String {
        let now = self.clock.now_ms();
        let size_bytes = encoded_size(kind, &payload, &impact);
        let weight = event_weight(&impact, size_bytes);

        let mut pending = self.pending();
        let commit_id = pending
            .commit_id
            .get_or_insert_with(|| self.ids.next_commit_id(now))
            .clone();
        let seq = u32::try_from(pending.events.len()).unwrap_or(u32::MAX);
        let id = Event::event_id(&commit_id, seq);
        pending.events.push(Event {
            id: id.clone(),
            commit_id,
            seq,
            ts: now,
            kind,
            payload,
            impact,
            size_bytes,
            inverse: None,
        });
        pending.weight += weight;
        id
    }

    /// Number of buffered, not yet flushed events.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending().events.len()
    }

    /// (Re)arm the debounce deadline `delay_ms` from now.
    pub fn queue_flush(&self, delay_ms: u64) {
        let delay = i64::try_from(delay_ms).unwrap_or(i64::MAX);
        let at = self.clock.now_ms().saturating_add(delay);
        *self.deadline() = Some(at);
    }

    /// Deadline of the armed debounce timer, if any.
    #[must_use]
    pub fn flush_deadline(&self) -> Option<i64> {
        *self.deadline()
    }

    /// Fire the debounce timer if its deadline has passed.
    ///
    /// Failures are logged, never returned; the batch stays buffered and the
    /// next flush retries it.
    pub fn tick(&self) -> Option<FlushOutcome> {
        {
            let mut deadline = self.deadline();
            match *deadline {
                Some(at) if at <= self.clock.now_ms() => *deadline = None,
                _ => return None,
            }
        }

        match self.flush() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "background flush failed");
                None
            }
        }
    }

    /// Seal and persist the buffered events as one commit.
    ///
    /// Returns `Ok(None)` when nothing is buffered. Remote and checkpoint
    /// failures are logged and reported through the outcome; only a failed
    /// local persist is an error, in which case the events are put back.
    ///
    /// # Errors
    ///
    /// Returns an error if the local transaction fails.
    pub fn flush(&self) -> Result<Option<FlushOutcome>, HistoryError> {
        let batch = {
            let mut pending = self.pending();
            if pending.is_empty() {
                return Ok(None);
            }
            mem::take(&mut *pending)
        };
        let Some(commit_id) = batch.commit_id.as_deref() else {
            return Ok(None);
        };

        let commit = Commit::from_events(commit_id, self.clock.now_ms(), batch.weight, &batch.events);
        if let Err(err) = self.store.persist_commit(&commit, &batch.events) {
            warn!(commit = %commit.commit_id, error = %err, "local persist failed; batch requeued");
            self.pending().restore_front(batch);
            return Err(err.into());
        }
        info!(
            commit = %commit.commit_id,
            events = commit.counts.events,
            weight = commit.weight,
            summary = %commit.summary,
            "committed"
        );

        let reconciled = self.reconcile();
        Ok(Some(FlushOutcome {
            commit,
            synced: reconciled.sync.is_complete(),
            snapshot: reconciled.snapshot,
        }))
    }

    /// Push every unsynced commit to the remote, then run the checkpoint
    /// policy over what was pushed. Failures are logged and reported in the
    /// outcome.
    pub fn reconcile(&self) -> ReconcileOutcome {
        let sync = sync::push_unsynced(&self.store, self.remote.as_ref());
        let snapshot = match self.policy.after_sync(
            &self.store,
            self.remote.as_ref(),
            self.producer.as_ref(),
            &sync,
        ) {
            Ok(name) => name,
            Err(err) => {
                warn!(error = %err, "checkpoint failed; will retry after the next append");
                None
            }
        };
        debug!(pushed = sync.pushed.len(), complete = sync.is_complete(), "reconciled");
        ReconcileOutcome { sync, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use crate::remote::MemoryBlobStore;
    use crate::snapshot::StoreSnapshots;
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<LocalStore>,
        remote: Arc<MemoryBlobStore>,
        batcher: CommitBatcher,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_706_659_200_000));
        let store = Arc::new(LocalStore::open_in_memory().expect("open"));
        let remote = Arc::new(MemoryBlobStore::new(clock.clone()));
        let producer = Arc::new(StoreSnapshots::new(store.clone(), clock.clone()));
        let batcher = CommitBatcher::new(
            store.clone(),
            remote.clone(),
            producer,
            clock.clone(),
            Arc::new(SequentialIds::new("c")),
            CheckpointPolicy::default(),
        );
        Fixture {
            clock,
            store,
            remote,
            batcher,
        }
    }

    fn tag_impact() -> Impact {
        Impact {
            tags: 1,
            ..Impact::default()
        }
    }

    #[test]
    fn record_opens_one_commit_and_numbers_events() {
        let fx = fixture();
        let first = fx
            .batcher
            .record_event(EventKind::TagCreate, json!({"name": "a"}), tag_impact());
        let second = fx
            .batcher
            .record_event(EventKind::TagCreate, json!({"name": "b"}), tag_impact());
        assert_eq!(first, "c1:0");
        assert_eq!(second, "c1:1");
        assert_eq!(fx.batcher.pending_len(), 2);
    }

    #[test]
    fn flush_persists_syncs_and_clears_buffer() {
        let fx = fixture();
        fx.batcher
            .record_event(EventKind::TagCreate, json!({"name": "a"}), tag_impact());
        fx.batcher.record_event(
            EventKind::ItemTagAdd,
            json!({"id": "v1", "tags": ["a"]}),
            Impact {
                items: 1,
                ..Impact::default()
            },
        );

        let outcome = fx.batcher.flush().expect("flush").expect("commit");
        assert!(outcome.synced);
        assert_eq!(outcome.commit.summary, "tag.create×1, item.tag_add×1");
        assert_eq!(outcome.commit.counts.events, 2);
        assert_eq!(fx.batcher.pending_len(), 0);
        assert_eq!(fx.store.commit_events("c1").expect("events").len(), 2);
        assert!(fx.remote.text("events-2024-01.jsonl").is_some());

        assert!(fx.batcher.flush().expect("second flush").is_none());
    }

    #[test]
    fn remote_failure_is_not_an_error() {
        let fx = fixture();
        fx.remote.set_fail_writes(true);
        fx.batcher
            .record_event(EventKind::TagCreate, json!({"name": "a"}), tag_impact());

        let outcome = fx.batcher.flush().expect("local persist succeeds").expect("commit");
        assert!(!outcome.synced);
        assert_eq!(fx.store.unsynced_commits().expect("unsynced").len(), 1);

        fx.remote.set_fail_writes(false);
        let reconciled = fx.batcher.reconcile();
        assert_eq!(reconciled.sync.pushed, ["c1"]);
    }

    #[test]
    fn failed_persist_requeues_batch_ahead_of_newer_events() {
        let fx = fixture();
        fx.batcher
            .record_event(EventKind::TagCreate, json!({"name": "a"}), tag_impact());
        fx.store.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER crash BEFORE INSERT ON events
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("install trigger");
        });

        assert!(fx.batcher.flush().is_err());
        fx.batcher
            .record_event(EventKind::TagCreate, json!({"name": "b"}), tag_impact());
        assert_eq!(fx.batcher.pending_len(), 2);

        fx.store.with_connection(|conn| {
            conn.execute_batch("DROP TRIGGER crash;").expect("drop trigger");
        });
        let outcome = fx.batcher.flush().expect("flush").expect("commit");
        assert_eq!(outcome.commit.commit_id, "c1");
        let ids: Vec<String> = fx
            .store
            .commit_events("c1")
            .expect("events")
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["c1:0", "c1:1"]);
    }

    #[test]
    fn debounce_keeps_a_single_deadline() {
        let fx = fixture();
        fx.batcher
            .record_event(EventKind::TagCreate, json!({"name": "a"}), tag_impact());
        fx.batcher.queue_flush(500);
        fx.clock.advance(400);
        fx.batcher.queue_flush(500);

        fx.clock.advance(200);
        assert!(fx.batcher.tick().is_none(), "re-armed deadline has not passed");
        assert_eq!(fx.batcher.pending_len(), 1);

        fx.clock.advance(300);
        let outcome = fx.batcher.tick().expect("deadline fired");
        assert_eq!(outcome.commit.commit_id, "c1");
        assert!(fx.batcher.flush_deadline().is_none());
        assert!(fx.batcher.tick().is_none());
    }

    #[test]
    fn weight_accumulates_rows_and_size() {
        let fx = fixture();
        let payload = json!({"name": "a"});
        let impact = tag_impact();
        let expected = event_weight(&impact, encoded_size(EventKind::TagCreate, &payload, &impact));
        fx.batcher.record_event(EventKind::TagCreate, payload, impact);
        let outcome = fx.batcher.flush().expect("flush").expect("commit");
        assert_eq!(outcome.commit.weight, expected);
    }
}
