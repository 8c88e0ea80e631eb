//! Mirror locally persisted commits into the remote monthly logs.
//!
//! Commits are pushed in local insertion order. Consecutive commits that fall
//! in the same UTC month share one read-modify-write of that month's log. A
//! failure stops the pass so later commits never land ahead of an earlier
//! one; they stay unsynced and are retried by the next pass.

use tracing::{debug, info, warn};

use crate::db::LocalStore;
use crate::error::HistoryError;
use crate::event::Commit;
use crate::log::{LogHeader, LogLine, MonthKey, MonthlyLog};
use crate::remote::{self, BlobStore};

/// What one sync pass managed to push.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Commit ids now mirrored remotely, in push order.
    pub pushed: Vec<String>,
    /// Summed weight of the pushed commits.
    pub weight: u64,
    /// Byte length of the last monthly log written.
    pub month_log_bytes: Option<u64>,
    /// Error that stopped the pass, if any.
    pub failure: Option<HistoryError>,
}

impl SyncOutcome {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Push every unsynced commit to the remote.
#[must_use]
pub fn push_unsynced(store: &LocalStore, remote: &dyn BlobStore) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    let commits = match store.unsynced_commits() {
        Ok(commits) => commits,
        Err(err) => {
            outcome.failure = Some(err.into());
            return outcome;
        }
    };
    if commits.is_empty() {
        return outcome;
    }

    for group in month_groups(&commits) {
        let month = MonthKey::from_millis(group[0].ts);
        match append_group(store, remote, &month, group) {
            Ok(bytes) => {
                let ids: Vec<String> = group.iter().map(|c| c.commit_id.clone()).collect();
                if let Err(err) = store.mark_synced(&ids) {
                    outcome.failure = Some(err.into());
                    break;
                }
                outcome.weight += group.iter().map(|c| c.weight).sum::<u64>();
                outcome.month_log_bytes = Some(bytes);
                outcome.pushed.extend(ids);
            }
            Err(err) => {
                warn!(
                    month = %month,
                    commits = group.len(),
                    error = %err,
                    "remote append failed; commits stay queued for the next sync"
                );
                outcome.failure = Some(err);
                break;
            }
        }
    }

    if !outcome.pushed.is_empty() {
        info!(pushed = outcome.pushed.len(), "synced commits to remote");
    }
    outcome
}

/// Split `commits` into runs of consecutive commits in the same month.
fn month_groups(commits: &[Commit]) -> Vec<&[Commit]> {
    commits
        .chunk_by(|a, b| MonthKey::from_millis(a.ts) == MonthKey::from_millis(b.ts))
        .collect()
}

/// Append `group` to its month's log. Returns the new log length in bytes.
fn append_group(
    store: &LocalStore,
    remote: &dyn BlobStore,
    month: &MonthKey,
    group: &[Commit],
) -> Result<u64, HistoryError> {
    let name = month.log_name();
    let mut log = match remote::read_text(remote, &name)? {
        Some((_, content)) => MonthlyLog::parse(&name, &content)?,
        None => MonthlyLog::new(&LogHeader {
            month: month.clone(),
            first_commit_ts: group[0].ts,
            first_commit_id: group[0].commit_id.clone(),
        })?,
    };

    for commit in group {
        for event in store.commit_events(&commit.commit_id)? {
            log.push(&LogLine::from(&event))?;
        }
    }

    let content = log.render();
    remote.create_or_replace(&name, content.as_bytes())?;
    debug!(log = %name, commits = group.len(), bytes = content.len(), "appended to monthly log");
    Ok(content.len() as u64)
}
