//! `ks status` and `ks catalog`: where history lives, what is still queued,
//! and the live catalog itself.

use super::Session;
use crate::output::{OutputMode, format_ms, pretty_kv, pretty_section, render};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    data_dir: PathBuf,
    remote_dir: PathBuf,
    unsynced_commits: usize,
    weight_since_snapshot: u64,
    current_month_log_bytes: u64,
    weight_threshold: u64,
    log_size_threshold: u64,
    latest_snapshot: Option<String>,
    latest_snapshot_at: Option<i64>,
}

pub fn run_status(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let store = session.history.store();
    let counters = store.load_counters()?;
    let latest = session.history.list_snapshots()?.into_iter().next();

    let status = Status {
        data_dir: session.data_dir.clone(),
        remote_dir: session.config.remote_dir(&session.data_dir),
        unsynced_commits: store.unsynced_commits()?.len(),
        weight_since_snapshot: counters.weight_since_snapshot,
        current_month_log_bytes: counters.current_month_log_bytes,
        weight_threshold: session.config.checkpoint.weight_threshold,
        log_size_threshold: session.config.checkpoint.log_size_threshold,
        latest_snapshot_at: latest.as_ref().map(|s| s.at),
        latest_snapshot: latest.map(|s| s.name),
    };

    render(output, &status, |s, w| {
        pretty_section(w, "keepsake")?;
        pretty_kv(w, "data", s.data_dir.display().to_string())?;
        pretty_kv(w, "remote", s.remote_dir.display().to_string())?;
        pretty_kv(w, "unsynced", s.unsynced_commits.to_string())?;
        pretty_kv(
            w,
            "weight",
            format!("{} / {}", s.weight_since_snapshot, s.weight_threshold),
        )?;
        pretty_kv(
            w,
            "month log",
            format!("{} / {} bytes", s.current_month_log_bytes, s.log_size_threshold),
        )?;
        match (&s.latest_snapshot, s.latest_snapshot_at) {
            (Some(name), Some(at)) => pretty_kv(w, "snapshot", format!("{name} ({})", format_ms(at))),
            _ => pretty_kv(w, "snapshot", "none"),
        }
    })
}

/// `ks catalog`: the live catalog as stored locally.
pub fn run_catalog(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let catalog = session.history.store().read_catalog()?;
    render(output, &catalog, |c, w| {
        pretty_section(w, "Tags")?;
        for tag in &c.tags {
            writeln!(w, "  {}", tag.name)?;
        }
        pretty_section(w, "Items")?;
        for item in &c.items {
            writeln!(w, "  {:<24} {}", item.id, item.tags.join(", "))?;
        }
        pretty_kv(w, "collections", c.collections.len().to_string())?;
        pretty_kv(w, "pending", c.pending.len().to_string())
    })
}
