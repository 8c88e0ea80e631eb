//! Command handlers. Each module owns its `clap` args and a `run_*` entry
//! point taking an open [`Session`].

pub mod backup;
pub mod bundle;
pub mod log;
pub mod record;
pub mod restore;
pub mod revert;
pub mod status;
pub mod sync;

use anyhow::Context;
use clap::{Args, ValueEnum};
use keepsake_core::History;
use keepsake_core::clock::{RandomIds, SystemClock};
use keepsake_core::config::{self, KeepsakeConfig, STORE_FILE};
use keepsake_core::db::LocalStore;
use keepsake_core::lock::WriterLock;
use keepsake_core::remote::DirBlobStore;
use keepsake_core::restore::{ApplyFlags, FieldApply};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// An open data directory, held under the writer lock for the life of one
/// command.
pub struct Session {
    pub history: History,
    pub config: KeepsakeConfig,
    pub data_dir: PathBuf,
    /// Commits pushed by the reconciliation pass run at open.
    pub startup_pushed: Vec<String>,
    _lock: WriterLock,
}

impl Session {
    /// Lock and open the data directory, then retry any commits a previous
    /// run left unsynced.
    pub fn open(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = config::resolve_data_dir(explicit)?;
        let lock = WriterLock::acquire(&data_dir, LOCK_TIMEOUT)?;
        let config = config::load_config(&data_dir)?;

        let store_path = data_dir.join(STORE_FILE);
        let store = LocalStore::open(&store_path)
            .with_context(|| format!("Failed to open {}", store_path.display()))?;
        let remote_dir = config.remote_dir(&data_dir);
        let remote = DirBlobStore::open(&remote_dir)
            .with_context(|| format!("Failed to open remote {}", remote_dir.display()))?;
        debug!(data_dir = %data_dir.display(), remote = %remote_dir.display(), "opened session");

        let history = History::new(
            Arc::new(store),
            Arc::new(remote),
            Arc::new(SystemClock),
            Arc::new(RandomIds),
            config.checkpoint.into(),
        );

        let reconciled = history.reconcile();
        if let Some(err) = &reconciled.sync.failure {
            warn!(error = %err, "startup sync failed; commits stay queued locally");
        }

        Ok(Self {
            history,
            config,
            data_dir,
            startup_pushed: reconciled.sync.pushed,
            _lock: lock,
        })
    }
}

/// `--item-tags` style switch for one restore field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FieldArg {
    Skip,
    Overwrite,
    Merge,
}

impl From<FieldArg> for FieldApply {
    fn from(arg: FieldArg) -> Self {
        match arg {
            FieldArg::Skip => Self::Skip,
            FieldArg::Overwrite => Self::Overwrite,
            FieldArg::Merge => Self::Merge,
        }
    }
}

/// Per-field overrides layered over `[restore.flags]` in config.toml.
#[derive(Args, Debug, Clone, Default)]
pub struct ApplyFlagArgs {
    /// How item tag lists are written.
    #[arg(long, value_enum)]
    pub item_tags: Option<FieldArg>,

    /// How collection tag lists are written.
    #[arg(long, value_enum)]
    pub collection_tags: Option<FieldArg>,

    /// How item/collection cross-references are written.
    #[arg(long, value_enum)]
    pub cross_refs: Option<FieldArg>,

    /// How item progress is written.
    #[arg(long, value_enum)]
    pub progress: Option<FieldArg>,
}

impl ApplyFlagArgs {
    pub fn resolve(&self, base: ApplyFlags) -> ApplyFlags {
        ApplyFlags {
            item_tags: self.item_tags.map_or(base.item_tags, Into::into),
            collection_tags: self.collection_tags.map_or(base.collection_tags, Into::into),
            cross_refs: self.cross_refs.map_or(base.cross_refs, Into::into),
            progress: self.progress.map_or(base.progress, Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flags_keep_config_values() {
        let base = ApplyFlags {
            item_tags: FieldApply::Merge,
            ..ApplyFlags::default()
        };
        let args = ApplyFlagArgs {
            progress: Some(FieldArg::Skip),
            ..ApplyFlagArgs::default()
        };
        let flags = args.resolve(base);
        assert_eq!(flags.item_tags, FieldApply::Merge);
        assert_eq!(flags.progress, FieldApply::Skip);
        assert_eq!(flags.cross_refs, FieldApply::Merge);
    }
}
