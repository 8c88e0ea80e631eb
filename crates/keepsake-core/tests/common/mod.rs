//! Shared harness: in-memory store, in-memory remote, manual clock, and
//! sequential commit ids.

#![allow(dead_code)]

use keepsake_core::catalog::CatalogState;
use keepsake_core::checkpoint::CheckpointPolicy;
use keepsake_core::clock::{ManualClock, SequentialIds};
use keepsake_core::db::LocalStore;
use keepsake_core::event::{EventKind, Impact};
use keepsake_core::remote::MemoryBlobStore;
use keepsake_core::snapshot::is_snapshot_name;
use keepsake_core::History;
use serde_json::Value;
use std::sync::Arc;

/// 2024-01-31T00:00:00Z
pub const JAN_31: i64 = 1_706_659_200_000;
pub const DAY: i64 = 86_400_000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<LocalStore>,
    pub remote: Arc<MemoryBlobStore>,
    pub history: History,
}

pub fn harness() -> Harness {
    harness_with(CheckpointPolicy::default())
}

pub fn harness_with(policy: CheckpointPolicy) -> Harness {
    let clock = Arc::new(ManualClock::new(JAN_31));
    let store = Arc::new(LocalStore::open_in_memory().expect("open store"));
    let remote = Arc::new(MemoryBlobStore::new(clock.clone()));
    let history = History::new(
        store.clone(),
        remote.clone(),
        clock.clone(),
        Arc::new(SequentialIds::new("c")),
        policy,
    );
    Harness {
        clock,
        store,
        remote,
        history,
    }
}

impl Harness {
    pub fn seed(&self, state: &CatalogState) {
        self.store.write_catalog(state).expect("seed catalog");
    }

    /// Apply `mutations` to the live catalog as one commit. Returns its id.
    pub fn commit(&self, mutations: Vec<(EventKind, Value)>) -> String {
        self.clock.advance(1_000);
        for (kind, payload) in mutations {
            self.history
                .apply_event(kind, payload, Impact::default())
                .expect("apply event");
        }
        self.clock.advance(10);
        self.history
            .flush()
            .expect("flush")
            .expect("commit sealed")
            .commit
            .commit_id
    }

    pub fn backup(&self) -> String {
        self.clock.advance(1_000);
        self.history.backup().expect("backup").snapshot
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.remote
            .names()
            .into_iter()
            .filter(|n| is_snapshot_name(n))
            .collect()
    }

    pub fn live(&self) -> CatalogState {
        self.store.read_catalog().expect("read catalog")
    }
}
