//! E2E CLI tests: record, backup, revert, and the export/prune/reattach cycle.
//!
//! Each test runs the `ks` binary as a subprocess against an isolated temp
//! data directory with the default directory remote.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn ks_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ks"));
    cmd.arg("--data-dir").arg(dir);
    cmd.env("KEEPSAKE_LOG", "off");
    cmd.env_remove("KEEPSAKE_DIR");
    cmd
}

fn ks_json(dir: &Path, args: &[&str]) -> Value {
    let output = ks_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("ks should not crash");
    assert!(
        output.status.success(),
        "ks {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

/// Record one mutation and return the sealed commit id.
fn record(dir: &Path, kind: &str, payload: &str) -> String {
    let json = ks_json(dir, &["record", kind, payload]);
    assert_eq!(json["synced"], true);
    json["commit"]["commitId"]
        .as_str()
        .expect("commit id")
        .to_string()
}

fn tag_names(dir: &Path) -> Vec<String> {
    let catalog = ks_json(dir, &["catalog"]);
    catalog["tags"]
        .as_array()
        .expect("tags array")
        .iter()
        .map(|t| t["name"].as_str().expect("tag name").to_string())
        .collect()
}

/// c1: tag a, then a snapshot, then c2: tag b and c3: tag c.
fn three_commits(dir: &Path) -> [String; 3] {
    let c1 = record(dir, "tag.create", r#"{"name":"a"}"#);
    ks_json(dir, &["backup"]);
    let c2 = record(dir, "tag.create", r#"{"name":"b"}"#);
    let c3 = record(dir, "tag.create", r#"{"name":"c"}"#);
    [c1, c2, c3]
}

// ===========================================================================
// Recording and inspection
// ===========================================================================

#[test]
fn record_writes_monthly_log_and_lists_commit() {
    let dir = TempDir::new().expect("tempdir");
    let c1 = record(dir.path(), "tag.create", r#"{"name":"music"}"#);

    let log = ks_json(dir.path(), &["log"]);
    let commits = log.as_array().expect("log array");
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["commitId"], c1.as_str());
    assert_eq!(commits[0]["summary"], "tag.create×1");

    let logs: Vec<_> = std::fs::read_dir(dir.path().join("remote"))
        .expect("remote dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("events-") && n.ends_with(".jsonl"))
        .collect();
    assert_eq!(logs.len(), 1);

    let show = ks_json(dir.path(), &["show", &c1]);
    assert_eq!(show["events"][0]["kind"], "tag.create");
    assert_eq!(tag_names(dir.path()), ["music"]);
}

#[test]
fn invalid_payload_is_rejected_with_code() {
    let dir = TempDir::new().expect("tempdir");
    let output = ks_cmd(dir.path())
        .args(["record", "tag.rename", r#"{"from":"a"}"#, "--json"])
        .output()
        .expect("ks should not crash");
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert_eq!(err["error"]["error_code"], "E2005");
}

#[test]
fn unknown_commit_reports_not_found() {
    let dir = TempDir::new().expect("tempdir");
    ks_cmd(dir.path())
        .args(["show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001").and(predicate::str::contains("nope")));
}

#[test]
fn status_reports_thresholds_and_snapshot() {
    let dir = TempDir::new().expect("tempdir");
    record(dir.path(), "tag.create", r#"{"name":"a"}"#);
    let backup = ks_json(dir.path(), &["backup"]);
    let name = backup["snapshot"].as_str().expect("snapshot name");
    assert!(name.starts_with("snapshots/settings-") && name.ends_with(".json"));

    let status = ks_json(dir.path(), &["status"]);
    assert_eq!(status["unsyncedCommits"], 0);
    assert_eq!(status["weightSinceSnapshot"], 0);
    assert_eq!(status["weightThreshold"], 10_000);
    assert_eq!(status["latestSnapshot"], name);

    let snapshots = ks_json(dir.path(), &["snapshots"]);
    assert_eq!(snapshots[0]["name"], name);
}

// ===========================================================================
// Point-in-time recovery
// ===========================================================================

#[test]
fn revert_previews_then_applies() {
    let dir = TempDir::new().expect("tempdir");
    let [_, c2, _] = three_commits(dir.path());

    let preview = ks_json(dir.path(), &["revert", &c2]);
    assert_eq!(preview["summary"]["dryRun"], true);
    assert_eq!(preview["summary"]["tags"]["cleared"], 1);
    assert_eq!(tag_names(dir.path()), ["a", "b", "c"]);

    let applied = ks_json(dir.path(), &["revert", &c2, "--apply"]);
    assert_eq!(applied["summary"]["dryRun"], false);
    assert_eq!(tag_names(dir.path()), ["a", "b"]);

    let log = ks_json(dir.path(), &["log", "-n", "1"]);
    assert_eq!(log[0]["summary"], "snapshot.import×1");
}

#[test]
fn revert_without_snapshot_is_blocked() {
    let dir = TempDir::new().expect("tempdir");
    let c1 = record(dir.path(), "tag.create", r#"{"name":"a"}"#);
    ks_cmd(dir.path())
        .args(["revert", &c1, "--apply"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2003"));
    assert_eq!(tag_names(dir.path()), ["a"]);
}

#[test]
fn restore_snapshot_dry_run_counts_only() {
    let dir = TempDir::new().expect("tempdir");
    three_commits(dir.path());
    let snapshots = ks_json(dir.path(), &["snapshots"]);
    let name = snapshots[0]["name"].as_str().expect("name").to_string();

    let summary = ks_json(dir.path(), &["restore", &name, "--dry-run"]);
    assert_eq!(summary["dryRun"], true);
    assert_eq!(summary["tags"]["cleared"], 2);
    assert_eq!(tag_names(dir.path()), ["a", "b", "c"]);
}

// ===========================================================================
// Retention
// ===========================================================================

#[test]
fn export_prune_reattach_cycle() {
    let dir = TempDir::new().expect("tempdir");
    let [c1, c2, c3] = three_commits(dir.path());
    let bundle = dir.path().join("bundle.json");
    let bundle_arg = bundle.to_str().expect("utf-8 path");

    let exported = ks_json(dir.path(), &["export", &c2, "--output", bundle_arg]);
    assert_eq!(exported["commits"], 2);
    assert!(bundle.exists());

    let pruned = ks_json(dir.path(), &["prune", &c2, "--yes"]);
    assert_eq!(pruned["localCommitsRemoved"], 2);
    let log = ks_json(dir.path(), &["log"]);
    assert_eq!(log.as_array().expect("log").len(), 1);
    assert_eq!(log[0]["commitId"], c3.as_str());

    let reattached = ks_json(dir.path(), &["reattach", bundle_arg]);
    assert_eq!(reattached["commitsImported"], 2);
    let ids: Vec<String> = ks_json(dir.path(), &["log"])
        .as_array()
        .expect("log")
        .iter()
        .map(|c| c["commitId"].as_str().expect("id").to_string())
        .collect();
    assert_eq!(ids, [c3, c2, c1]);

    ks_cmd(dir.path())
        .args(["reattach", bundle_arg])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2004"));
}

#[test]
fn prune_requires_confirmation() {
    let dir = TempDir::new().expect("tempdir");
    let [_, c2, _] = three_commits(dir.path());
    ks_cmd(dir.path())
        .args(["prune", &c2])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
    assert_eq!(ks_json(dir.path(), &["log"]).as_array().expect("log").len(), 3);
}
