//! `ks flush` and `ks sync`: seal buffered events and push queued commits.

use super::Session;
use crate::output::{OutputMode, pretty_kv, render};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReport {
    pushed: Vec<String>,
    snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run_flush(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let flushed = session.history.flush()?;
    let report = SyncReport {
        pushed: flushed
            .iter()
            .filter(|o| o.synced)
            .map(|o| o.commit.commit_id.clone())
            .collect(),
        snapshot: flushed.and_then(|o| o.snapshot),
        error: None,
    };
    print_report(output, &report)
}

/// Push every unsynced commit. Exits non-zero if the remote rejected any.
pub fn run_sync(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let reconciled = session.history.reconcile();
    let unsynced = session.history.store().unsynced_commits()?;
    let mut pushed = session.startup_pushed.clone();
    pushed.extend(reconciled.sync.pushed);
    let report = SyncReport {
        pushed,
        snapshot: reconciled.snapshot,
        error: reconciled.sync.failure.as_ref().map(ToString::to_string),
    };
    print_report(output, &report)?;

    match reconciled.sync.failure {
        Some(err) => Err(err.into()),
        None if !unsynced.is_empty() => {
            anyhow::bail!("{} commits still unsynced", unsynced.len())
        }
        None => Ok(()),
    }
}

fn print_report(output: OutputMode, report: &SyncReport) -> anyhow::Result<()> {
    render(output, report, |r, w| {
        pretty_kv(w, "pushed", r.pushed.len().to_string())?;
        if let Some(snapshot) = &r.snapshot {
            pretty_kv(w, "snapshot", snapshot)?;
        }
        if let Some(error) = &r.error {
            pretty_kv(w, "error", error)?;
        }
        Ok(())
    })
}
