//! Integration tests: export, prune, and reattach across a month boundary.
//!
//! Layout built by [`january_and_february`]:
//!
//! ```text
//! snapshot (Jan 31)   C1 (Jan 31)   | C2, C3 (Feb 1)   snapshot (Feb 1)
//! ```

mod common;

use std::collections::BTreeMap;

use common::{DAY, Harness, harness};
use keepsake_core::event::EventKind;
use keepsake_core::prune::{CUTOFF_MARKER_NAME, HistoryBundle};
use keepsake_core::HistoryError;
use serde_json::json;

const JAN_LOG: &str = "events-2024-01.jsonl";
const FEB_LOG: &str = "events-2024-02.jsonl";

fn january_and_february() -> (Harness, [String; 3]) {
    let h = harness();
    h.backup();
    let c1 = h.commit(vec![(EventKind::TagCreate, json!({"name": "a"}))]);
    h.clock.advance(DAY);
    let c2 = h.commit(vec![(EventKind::TagCreate, json!({"name": "b"}))]);
    let c3 = h.commit(vec![(EventKind::TagCreate, json!({"name": "c"}))]);
    h.backup();
    (h, [c1, c2, c3])
}

fn remote_files(h: &Harness) -> BTreeMap<String, String> {
    h.remote
        .names()
        .into_iter()
        .filter_map(|name| h.remote.text(&name).map(|text| (name, text)))
        .collect()
}

#[test]
fn export_prune_reattach_restores_remote_byte_for_byte() {
    let (h, [c1, c2, c3]) = january_and_february();
    let before = remote_files(&h);
    assert!(before.contains_key(JAN_LOG));
    assert!(before.contains_key(FEB_LOG));

    let bundle = h.history.export_up_to(&c2).expect("export");
    assert_eq!(bundle.logs.len(), 2);
    assert_eq!(bundle.snapshots.len(), 1);
    let exported: Vec<&str> = bundle.commits.iter().map(|c| c.commit.commit_id.as_str()).collect();
    assert_eq!(exported, [c1.as_str(), c2.as_str()]);

    // Bundles travel as JSON files.
    let encoded = serde_json::to_string(&bundle).expect("encode bundle");
    let bundle: HistoryBundle = serde_json::from_str(&encoded).expect("decode bundle");

    let report = h.history.prune(&c2).expect("prune");
    assert_eq!(report.deleted_logs, [JAN_LOG]);
    assert_eq!(report.deleted_snapshots.len(), 1);
    assert!(report.exact_boundary);
    assert_eq!(report.local_commits_removed, 2);
    assert!(h.store.get_commit(&c1).expect("get").is_none());
    assert!(h.store.get_commit(&c3).expect("get").is_some());

    let pruned = remote_files(&h);
    assert!(!pruned.contains_key(JAN_LOG));
    assert!(pruned.contains_key(CUTOFF_MARKER_NAME));
    assert!(pruned[FEB_LOG].contains(&c3));
    assert!(!pruned[FEB_LOG].contains(&format!("\"commitId\":\"{c2}\"")));

    let reattached = h.history.reattach(&bundle).expect("reattach");
    assert_eq!(reattached.commits_imported, 2);
    assert_eq!(remote_files(&h), before);
    assert!(h.store.get_commit(&c1).expect("get").is_some());
    assert!(h.store.get_commit(&c2).expect("get").is_some());
    assert!(h.store.unsynced_commits().expect("unsynced").is_empty());
}

#[test]
fn history_is_usable_after_prune() {
    let (h, [_, c2, c3]) = january_and_february();
    h.history.prune(&c2).expect("prune");

    let c4 = h.commit(vec![(EventKind::TagDelete, json!({"name": "a"}))]);
    let reconstruction =
        keepsake_core::replay::reconstruct(&h.store, h.remote.as_ref(), &c4).expect("replay");
    let names: Vec<String> = reconstruction
        .state
        .to_state()
        .tags
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, ["b", "c"]);

    assert!(matches!(
        h.history.prune(&c3),
        Err(HistoryError::Blocked(_))
    ));
}

#[test]
fn reattach_rejects_a_bundle_for_another_cutoff() {
    let (h, [_, c2, c3]) = january_and_february();
    let bundle = h.history.export_up_to(&c2).expect("export");
    h.history.prune(&c3).expect("prune later");

    let before = remote_files(&h);
    let err = h.history.reattach(&bundle).expect_err("wrong cutoff");
    assert!(matches!(err, HistoryError::Rejected(_)));
    assert_eq!(remote_files(&h), before);
}

#[test]
fn reattach_rejects_tampered_content() {
    let (h, [_, c2, _]) = january_and_february();
    let mut bundle = h.history.export_up_to(&c2).expect("export");
    h.history.prune(&c2).expect("prune");

    bundle.logs[0].content.push_str("{\"forged\":true}\n");
    let before = remote_files(&h);
    let err = h.history.reattach(&bundle).expect_err("tampered");
    assert!(matches!(err, HistoryError::Rejected(ref msg) if msg.contains("digest")));
    assert_eq!(remote_files(&h), before);
}

#[test]
fn second_reattach_is_rejected() {
    let (h, [_, c2, _]) = january_and_february();
    let bundle = h.history.export_up_to(&c2).expect("export");
    h.history.prune(&c2).expect("prune");
    h.history.reattach(&bundle).expect("first reattach");

    let err = h.history.reattach(&bundle).expect_err("marker consumed");
    assert!(matches!(err, HistoryError::Rejected(_)));
}

#[test]
fn export_is_read_only() {
    let (h, [_, c2, _]) = january_and_february();
    let before = remote_files(&h);
    let commits = h.history.list_commits(100).expect("list").len();

    h.history.export_up_to(&c2).expect("export");

    assert_eq!(remote_files(&h), before);
    assert_eq!(h.history.list_commits(100).expect("list").len(), commits);
}
