//! Point-in-time reconstruction.
//!
//! State as of a commit is rebuilt from the newest snapshot taken at or
//! before the commit, plus every monthly log line between that snapshot and
//! the end of the commit:
//!
//! ```text
//! snapshot(at <= commit.ts)
//!   + events-<month>.jsonl   for baseline month <= month < commit month (whole body)
//!   + events-<commit month>  up to the last line of the commit
//! ```
//!
//! Lines stamped before the snapshot are already contained in it and are
//! skipped. Lines that fail to decode are skipped with a warning and counted.

pub mod apply;

pub use apply::WorkingState;

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::LocalStore;
use crate::error::HistoryError;
use crate::event::{Commit, Mutation};
use crate::log::{LogLine, MonthKey, MonthlyLog};
use crate::remote::{BlobMeta, BlobStore};
use crate::snapshot::{self, Snapshot};

/// Diagnostics from one reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub baseline: String,
    pub baseline_at: i64,
    /// Monthly logs read, oldest first.
    pub months: Vec<String>,
    pub applied: usize,
    pub skipped_before_baseline: usize,
    /// Audit-only events that carry no catalog mutation.
    pub skipped_audit: usize,
    pub malformed: usize,
    /// `false` when the commit's lines were not found and the timestamp
    /// fallback located the boundary.
    pub exact_boundary: bool,
}

/// State as of a commit.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub commit: Commit,
    pub state: WorkingState,
    pub report: ReplayReport,
}

/// Rebuild the catalog as of `commit_id`. Read-only on both stores.
///
/// # Errors
///
/// - [`HistoryError::CommitNotFound`] if the commit is unknown locally.
/// - [`HistoryError::Blocked`] if no snapshot predates the commit.
/// - [`HistoryError::Snapshot`] if the baseline has an unsupported version.
/// - Store and remote errors from reading.
pub fn reconstruct(
    store: &LocalStore,
    remote: &dyn BlobStore,
    commit_id: &str,
) -> Result<Reconstruction, HistoryError> {
    let commit = store
        .get_commit(commit_id)?
        .ok_or_else(|| HistoryError::CommitNotFound(commit_id.to_string()))?;
    let commit_month = MonthKey::from_millis(commit.ts);

    let listing = remote.list()?;
    let baseline = snapshot::latest_at_or_before(&listing, commit.ts)
        .ok_or_else(|| HistoryError::Blocked("no baseline snapshot".to_string()))?;
    let base = Snapshot::decode(&remote.read(&baseline.blob.id)?)?;

    let mut state = WorkingState::from_state(base.into_state());
    let mut report = ReplayReport {
        baseline: baseline.blob.name.clone(),
        baseline_at: baseline.at,
        exact_boundary: true,
        ..ReplayReport::default()
    };

    let baseline_month = MonthKey::from_millis(baseline.at);
    for (month, blob) in logs_between(&listing, &baseline_month, &commit_month) {
        let content = String::from_utf8_lossy(&remote.read(&blob.id)?).into_owned();
        let log = match MonthlyLog::parse(&blob.name, &content) {
            Ok(log) => log,
            Err(err) => {
                warn!(log = %blob.name, error = %err, "skipping unreadable monthly log");
                continue;
            }
        };

        let end = if month == commit_month {
            let boundary = log.boundary(&commit.commit_id, commit.ts);
            if !boundary.exact {
                warn!(
                    log = %blob.name,
                    commit = %commit.commit_id,
                    end = boundary.end,
                    "commit lines not found; falling back to timestamp boundary"
                );
            }
            report.exact_boundary = boundary.exact;
            boundary.end
        } else {
            log.lines().len()
        };

        replay_lines(&mut state, &log.lines()[..end], baseline.at, &mut report);
        report.months.push(month.to_string());
    }

    if !report.months.iter().any(|m| m.as_str() == commit_month.as_str()) {
        warn!(
            commit = %commit.commit_id,
            month = %commit_month,
            "no readable monthly log holds the commit; state may miss its events"
        );
        report.exact_boundary = false;
    }

    debug!(
        commit = %commit.commit_id,
        baseline = %report.baseline,
        applied = report.applied,
        malformed = report.malformed,
        "reconstructed state"
    );
    Ok(Reconstruction {
        commit,
        state,
        report,
    })
}

/// Monthly logs with `from <= month <= to`, oldest first.
fn logs_between<'a>(
    listing: &'a [BlobMeta],
    from: &MonthKey,
    to: &MonthKey,
) -> Vec<(MonthKey, &'a BlobMeta)> {
    let mut logs: Vec<(MonthKey, &BlobMeta)> = listing
        .iter()
        .filter_map(|blob| MonthKey::from_log_name(&blob.name).map(|m| (m, blob)))
        .filter(|(month, _)| month >= from && month <= to)
        .collect();
    logs.sort_by(|a, b| a.0.cmp(&b.0));
    logs
}

/// Apply raw log lines in order, skipping lines stamped before `not_before`.
pub fn replay_lines(
    state: &mut WorkingState,
    lines: &[String],
    not_before: i64,
    report: &mut ReplayReport,
) {
    for (index, raw) in lines.iter().enumerate() {
        let line: LogLine = match serde_json::from_str(raw) {
            Ok(line) => line,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping malformed log line");
                report.malformed += 1;
                continue;
            }
        };
        if line.ts < not_before {
            report.skipped_before_baseline += 1;
            continue;
        }
        match Mutation::parse(line.kind, &line.payload) {
            Ok(Some(mutation)) => {
                state.apply(mutation);
                report.applied += 1;
            }
            Ok(None) => report.skipped_audit += 1,
            Err(err) => {
                warn!(line = index + 1, commit = %line.commit_id, error = %err, "skipping malformed payload");
                report.malformed += 1;
            }
        }
    }
}
