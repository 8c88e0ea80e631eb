//! Pruning history up to a commit, exporting the pruned slice, and
//! reattaching it.
//!
//! All three share one boundary rule: the cut falls just after the last line
//! of the target commit in its month's log. Prune keeps what is after the
//! cut; export bundles what is at or before it. A remote cutoff marker
//! records the prune so only the matching bundle can be reattached, which
//! restores the monthly logs byte for byte.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::LocalStore;
use crate::error::HistoryError;
use crate::event::{Commit, Event};
use crate::log::{MonthKey, MonthlyLog, render_lines};
use crate::remote::{self, BlobMeta, BlobStore};
use crate::snapshot;

/// Remote name of the cutoff marker.
pub const CUTOFF_MARKER_NAME: &str = "cutoff-marker.json";

/// Format tag written into every bundle.
pub const BUNDLE_FORMAT: &str = "keepsake-history/1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoffMarker {
    pub cutoff_at_commit_id: String,
    pub cutoff_at_ts: i64,
    pub created_at: i64,
}

/// One remote file carried by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    pub content: String,
    /// BLAKE3 hex digest of `content`.
    pub blake3: String,
}

impl BundleFile {
    #[must_use]
    pub fn new(name: impl Into<String>, content: String) -> Self {
        let blake3 = blake3::hash(content.as_bytes()).to_hex().to_string();
        Self {
            name: name.into(),
            content,
            blake3,
        }
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        blake3::hash(self.content.as_bytes()).to_hex().as_str() == self.blake3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleCommit {
    pub commit: Commit,
    pub events: Vec<Event>,
}

/// Everything at or before a cutoff commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBundle {
    pub format: String,
    pub cutoff_commit_id: String,
    pub cutoff_ts: i64,
    pub created_at: i64,
    /// Monthly logs, oldest first. The cutoff month holds only the lines up
    /// to and including the cutoff commit.
    pub logs: Vec<BundleFile>,
    pub snapshots: Vec<BundleFile>,
    /// Local commit records with their events, oldest first.
    #[serde(default)]
    pub commits: Vec<BundleCommit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub commit_id: String,
    pub deleted_logs: Vec<String>,
    pub deleted_snapshots: Vec<String>,
    /// Lines removed from the cutoff month's log.
    pub trimmed_lines: usize,
    pub local_commits_removed: usize,
    pub exact_boundary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReattachReport {
    pub cutoff_commit_id: String,
    pub logs: Vec<String>,
    pub snapshots: Vec<String>,
    pub commits_imported: usize,
}

fn require_commit(store: &LocalStore, commit_id: &str) -> Result<Commit, HistoryError> {
    store
        .get_commit(commit_id)?
        .ok_or_else(|| HistoryError::CommitNotFound(commit_id.to_string()))
}

/// Monthly logs in `listing` with their months, oldest first.
fn monthly_logs(listing: &[BlobMeta]) -> Vec<(MonthKey, &BlobMeta)> {
    let mut logs: Vec<(MonthKey, &BlobMeta)> = listing
        .iter()
        .filter_map(|b| MonthKey::from_log_name(&b.name).map(|m| (m, b)))
        .collect();
    logs.sort_by(|a, b| a.0.cmp(&b.0));
    logs
}

fn markers(listing: &[BlobMeta]) -> Vec<&BlobMeta> {
    listing
        .iter()
        .filter(|b| b.name == CUTOFF_MARKER_NAME)
        .collect()
}

fn read_string(remote: &dyn BlobStore, blob: &BlobMeta) -> Result<String, HistoryError> {
    Ok(String::from_utf8_lossy(&remote.read(&blob.id)?).into_owned())
}

/// Delete all history up to and including `commit_id`.
///
/// # Errors
///
/// - [`HistoryError::CommitNotFound`] for an unknown commit.
/// - [`HistoryError::Blocked`] when no snapshot predates the commit; nothing
///   is deleted in that case.
/// - Store and remote errors.
pub fn prune(
    store: &LocalStore,
    remote: &dyn BlobStore,
    commit_id: &str,
    now_ms: i64,
) -> Result<PruneReport, HistoryError> {
    let commit = require_commit(store, commit_id)?;
    let listing = remote.list()?;
    if snapshot::latest_at_or_before(&listing, commit.ts).is_none() {
        return Err(HistoryError::Blocked("no baseline snapshot".to_string()));
    }

    let month = MonthKey::from_millis(commit.ts);
    let mut report = PruneReport {
        commit_id: commit.commit_id.clone(),
        exact_boundary: true,
        ..PruneReport::default()
    };

    for (log_month, blob) in monthly_logs(&listing) {
        if log_month < month {
            remote.delete(&blob.id)?;
            report.deleted_logs.push(blob.name.clone());
        }
    }

    for snap in snapshot::snapshots_in(&listing) {
        if snap.at <= commit.ts {
            remote.delete(&snap.blob.id)?;
            report.deleted_snapshots.push(snap.blob.name.clone());
        }
    }

    let log_name = month.log_name();
    if let Some((_, content)) = remote::read_text(remote, &log_name)? {
        let log = MonthlyLog::parse(&log_name, &content)?;
        let boundary = log.boundary(&commit.commit_id, commit.ts);
        if !boundary.exact {
            warn!(log = %log_name, commit = %commit.commit_id, "prune boundary found by timestamp fallback");
        }
        report.exact_boundary = boundary.exact;
        report.trimmed_lines = boundary.end;
        let kept = log.slice(boundary.end..log.lines().len());
        remote.create_or_replace(&log_name, kept.render().as_bytes())?;
    }

    for marker in markers(&listing) {
        remote.delete(&marker.id)?;
    }
    let marker = CutoffMarker {
        cutoff_at_commit_id: commit.commit_id.clone(),
        cutoff_at_ts: commit.ts,
        created_at: now_ms,
    };
    remote.create_or_replace(CUTOFF_MARKER_NAME, &serde_json::to_vec(&marker)?)?;

    report.local_commits_removed = store.delete_history_through(&commit.commit_id)?;
    info!(
        commit = %commit.commit_id,
        logs = report.deleted_logs.len(),
        snapshots = report.deleted_snapshots.len(),
        lines = report.trimmed_lines,
        local = report.local_commits_removed,
        "pruned history"
    );
    Ok(report)
}

/// Bundle everything [`prune`] would delete for `commit_id`. Read-only.
///
/// # Errors
///
/// Returns [`HistoryError::CommitNotFound`] for an unknown commit, or store
/// and remote errors.
pub fn export_up_to(
    store: &LocalStore,
    remote: &dyn BlobStore,
    commit_id: &str,
    now_ms: i64,
) -> Result<HistoryBundle, HistoryError> {
    let commit = require_commit(store, commit_id)?;
    let listing = remote.list()?;
    let month = MonthKey::from_millis(commit.ts);

    let mut logs = Vec::new();
    for (log_month, blob) in monthly_logs(&listing) {
        if log_month > month {
            continue;
        }
        let content = read_string(remote, blob)?;
        if log_month < month {
            logs.push(BundleFile::new(&blob.name, content));
            continue;
        }
        let log = MonthlyLog::parse(&blob.name, &content)?;
        let boundary = log.boundary(&commit.commit_id, commit.ts);
        if !boundary.exact {
            warn!(log = %blob.name, commit = %commit.commit_id, "export boundary found by timestamp fallback");
        }
        logs.push(BundleFile::new(&blob.name, log.slice(0..boundary.end).render()));
    }

    let mut snapshots = Vec::new();
    for snap in snapshot::snapshots_in(&listing).into_iter().rev() {
        if snap.at <= commit.ts {
            let content = read_string(remote, &snap.blob)?;
            snapshots.push(BundleFile::new(&snap.blob.name, content));
        }
    }

    let mut commits = Vec::new();
    for record in store.commits_through(&commit.commit_id)? {
        let events = store.commit_events(&record.commit_id)?;
        commits.push(BundleCommit {
            commit: record,
            events,
        });
    }

    info!(
        commit = %commit.commit_id,
        logs = logs.len(),
        snapshots = snapshots.len(),
        commits = commits.len(),
        "exported history"
    );
    Ok(HistoryBundle {
        format: BUNDLE_FORMAT.to_string(),
        cutoff_commit_id: commit.commit_id,
        cutoff_ts: commit.ts,
        created_at: now_ms,
        logs,
        snapshots,
        commits,
    })
}

/// Check a bundle against the remote without changing anything. Returns the
/// marker blobs to delete on success.
fn validate(bundle: &HistoryBundle, listing: &[BlobMeta], remote: &dyn BlobStore) -> Result<Vec<String>, HistoryError> {
    if bundle.format != BUNDLE_FORMAT {
        return Err(HistoryError::Rejected(format!(
            "unknown bundle format {:?}",
            bundle.format
        )));
    }
    for file in bundle.logs.iter().chain(&bundle.snapshots) {
        if !file.verify() {
            return Err(HistoryError::Rejected(format!("digest mismatch for {}", file.name)));
        }
    }
    if let Some(bad) = bundle
        .logs
        .iter()
        .find(|f| MonthKey::from_log_name(&f.name).is_none())
        .or_else(|| bundle.snapshots.iter().find(|f| !snapshot::is_snapshot_name(&f.name)))
    {
        return Err(HistoryError::Rejected(format!("unexpected file {}", bad.name)));
    }

    let found = markers(listing);
    let [marker_blob] = found.as_slice() else {
        return Err(HistoryError::Rejected(format!(
            "expected exactly one cutoff marker, found {}",
            found.len()
        )));
    };
    let marker: CutoffMarker = serde_json::from_slice(&remote.read(&marker_blob.id)?)
        .map_err(|e| HistoryError::Rejected(format!("unreadable cutoff marker: {e}")))?;
    if marker.cutoff_at_commit_id != bundle.cutoff_commit_id {
        return Err(HistoryError::Rejected(format!(
            "bundle cuts at {} but the remote was pruned at {}",
            bundle.cutoff_commit_id, marker.cutoff_at_commit_id
        )));
    }
    Ok(vec![marker_blob.id.clone()])
}

/// Splice an exported bundle back in front of the pruned history.
///
/// # Errors
///
/// Returns [`HistoryError::Rejected`] without side effects when the bundle
/// does not match the single current cutoff marker or any file fails its
/// digest; otherwise store and remote errors.
pub fn reattach(
    store: &LocalStore,
    remote: &dyn BlobStore,
    bundle: &HistoryBundle,
) -> Result<ReattachReport, HistoryError> {
    let listing = remote.list()?;
    let marker_ids = validate(bundle, &listing, remote)?;
    let mut report = ReattachReport {
        cutoff_commit_id: bundle.cutoff_commit_id.clone(),
        ..ReattachReport::default()
    };

    for file in &bundle.logs {
        let content = match remote::read_text(remote, &file.name)? {
            Some((_, existing)) => {
                let tail = MonthlyLog::parse(&file.name, &existing)?;
                let mut joined = file.content.clone();
                joined.push_str(&render_lines(tail.lines()));
                joined
            }
            None => file.content.clone(),
        };
        remote.create_or_replace(&file.name, content.as_bytes())?;
        report.logs.push(file.name.clone());
    }

    for file in &bundle.snapshots {
        remote.create_or_replace(&file.name, file.content.as_bytes())?;
        report.snapshots.push(file.name.clone());
    }

    for id in marker_ids {
        remote.delete(&id)?;
    }

    for entry in &bundle.commits {
        if store.import_commit(&entry.commit, &entry.events)? {
            report.commits_imported += 1;
        }
    }

    info!(
        cutoff = %bundle.cutoff_commit_id,
        logs = report.logs.len(),
        snapshots = report.snapshots.len(),
        commits = report.commits_imported,
        "reattached history"
    );
    Ok(report)
}
