//! Integration tests: automatic snapshots when checkpoint thresholds are
//! crossed during flush.

mod common;

use common::{harness, harness_with};
use keepsake_core::checkpoint::CheckpointPolicy;
use keepsake_core::event::{EventKind, Impact};
use serde_json::json;

fn ingest(h: &common::Harness, items: u64) -> Option<String> {
    h.clock.advance(1_000);
    h.history.record_event(
        EventKind::ItemIngest,
        json!({"source": "scrape"}),
        Impact {
            items,
            ..Impact::default()
        },
    );
    h.history
        .flush()
        .expect("flush")
        .expect("commit sealed")
        .snapshot
}

#[test]
fn weight_threshold_writes_exactly_one_snapshot() {
    let h = harness();

    assert_eq!(ingest(&h, 9_000), None);
    assert!(h.snapshot_names().is_empty());
    assert_eq!(h.store.load_counters().expect("counters").weight_since_snapshot, 9_001);

    let written = ingest(&h, 999).expect("threshold crossed");
    assert_eq!(h.snapshot_names(), [written]);
    assert_eq!(h.store.load_counters().expect("counters").weight_since_snapshot, 0);

    assert_eq!(ingest(&h, 1), None);
    assert_eq!(h.snapshot_names().len(), 1);
}

#[test]
fn log_size_threshold_triggers_snapshot() {
    let h = harness_with(CheckpointPolicy {
        weight_threshold: u64::MAX,
        log_size_threshold: 256,
    });

    let mut written = None;
    for _ in 0..8 {
        written = ingest(&h, 1);
        if written.is_some() {
            break;
        }
    }
    assert!(written.is_some(), "monthly log never crossed 256 bytes");
    let counters = h.store.load_counters().expect("counters");
    assert!(counters.current_month_log_bytes >= 256);
}

#[test]
fn manual_backup_resets_weight() {
    let h = harness();
    ingest(&h, 5_000);
    h.backup();
    assert_eq!(h.store.load_counters().expect("counters").weight_since_snapshot, 0);

    assert_eq!(ingest(&h, 9_000), None);
    assert_eq!(h.snapshot_names().len(), 1);
}
