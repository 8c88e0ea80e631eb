use std::fmt;

use crate::db::StoreError;
use crate::event::PayloadError;
use crate::log::LogError;
use crate::remote::BlobError;
use crate::snapshot::SnapshotError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    CommitNotFound,
    SnapshotNotFound,
    BaselineMissing,
    BundleRejected,
    InvalidEvent,
    UnsupportedSnapshotVersion,
    CorruptLog,
    LocalStoreFailed,
    RemoteUnavailable,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::CommitNotFound => "E2001",
            Self::SnapshotNotFound => "E2002",
            Self::BaselineMissing => "E2003",
            Self::BundleRejected => "E2004",
            Self::InvalidEvent => "E2005",
            Self::UnsupportedSnapshotVersion => "E3001",
            Self::CorruptLog => "E3002",
            Self::LocalStoreFailed => "E5001",
            Self::RemoteUnavailable => "E5002",
            Self::LockContention => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Data directory not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::CommitNotFound => "Commit not found",
            Self::SnapshotNotFound => "Snapshot not found",
            Self::BaselineMissing => "No baseline snapshot at or before the commit",
            Self::BundleRejected => "History bundle rejected",
            Self::InvalidEvent => "Event payload does not match its kind",
            Self::UnsupportedSnapshotVersion => "Unsupported snapshot schema version",
            Self::CorruptLog => "Corrupt monthly event log",
            Self::LocalStoreFailed => "Local store operation failed",
            Self::RemoteUnavailable => "Remote blob store unavailable",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run any `ks` command once to create the data directory."),
            Self::ConfigParseError => Some("Fix syntax in config.toml and retry."),
            Self::CommitNotFound => Some("Use `ks log` to list known commit ids."),
            Self::SnapshotNotFound => Some("Use `ks snapshots` to list remote snapshots."),
            Self::BaselineMissing => Some("Run `ks backup` to write a snapshot, then retry."),
            Self::BundleRejected => {
                Some("Only the bundle exported for the current cutoff can be reattached.")
            }
            Self::InvalidEvent => Some("Check the payload fields required by the event kind."),
            Self::UnsupportedSnapshotVersion => {
                Some("Upgrade keepsake to a version that understands this snapshot.")
            }
            Self::CorruptLog => Some("Inspect the monthly log blob; the header line may be missing."),
            Self::LocalStoreFailed => Some("Check disk space and write permissions."),
            Self::RemoteUnavailable => Some("Retry later; run `ks sync` once the remote is back."),
            Self::LockContention => Some("Retry after the other `ks` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by user-initiated history operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The commit id is not present in the local store.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// No remote blob carries the requested snapshot name.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// The operation cannot proceed safely; nothing was changed.
    #[error("blocked: {0}")]
    Blocked(String),

    /// A reattach bundle does not belong to the current cutoff.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] BlobError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("failed to encode history data: {0}")]
    Encode(#[from] serde_json::Error),
}

impl HistoryError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CommitNotFound(_) => ErrorCode::CommitNotFound,
            Self::SnapshotNotFound(_) => ErrorCode::SnapshotNotFound,
            Self::Blocked(_) => ErrorCode::BaselineMissing,
            Self::Rejected(_) => ErrorCode::BundleRejected,
            Self::Payload(_) => ErrorCode::InvalidEvent,
            Self::Snapshot(SnapshotError::UnsupportedVersion { .. }) => {
                ErrorCode::UnsupportedSnapshotVersion
            }
            Self::Snapshot(_) | Self::Log(_) => ErrorCode::CorruptLog,
            Self::Store(_) => ErrorCode::LocalStoreFailed,
            Self::Remote(_) => ErrorCode::RemoteUnavailable,
            Self::Encode(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, HistoryError};
    use crate::snapshot::SnapshotError;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::CommitNotFound,
            ErrorCode::SnapshotNotFound,
            ErrorCode::BaselineMissing,
            ErrorCode::BundleRejected,
            ErrorCode::InvalidEvent,
            ErrorCode::UnsupportedSnapshotVersion,
            ErrorCode::CorruptLog,
            ErrorCode::LocalStoreFailed,
            ErrorCode::RemoteUnavailable,
            ErrorCode::LockContention,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::BundleRejected.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn history_errors_map_to_codes() {
        assert_eq!(
            HistoryError::CommitNotFound("c1".into()).code(),
            ErrorCode::CommitNotFound
        );
        assert_eq!(
            HistoryError::Blocked("no baseline snapshot".into()).code(),
            ErrorCode::BaselineMissing
        );
        let version = HistoryError::Snapshot(SnapshotError::UnsupportedVersion {
            found: 9,
            expected: 1,
        });
        assert_eq!(version.code(), ErrorCode::UnsupportedSnapshotVersion);
        assert!(version.hint().is_some());
    }
}
