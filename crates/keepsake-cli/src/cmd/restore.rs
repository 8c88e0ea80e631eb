//! `ks restore`: write a named remote snapshot into the live catalog.

use super::revert::write_summary;
use super::{ApplyFlagArgs, Session};
use crate::output::{OutputMode, render};
use clap::{Args, ValueEnum};
use keepsake_core::restore::{RestoreMode, RestoreOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Replace registries with the snapshot's.
    Overwrite,
    /// Match snapshot records onto existing ones.
    Merge,
}

impl From<ModeArg> for RestoreMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Overwrite => Self::Overwrite,
            ModeArg::Merge => Self::Merge,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Snapshot blob name, as listed by `ks snapshots`.
    pub name: String,

    #[arg(long, value_enum, default_value = "overwrite")]
    pub mode: ModeArg,

    /// Count changes without writing.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub flags: ApplyFlagArgs,
}

pub fn run_restore(args: &RestoreArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let options = RestoreOptions {
        mode: args.mode.into(),
        flags: args.flags.resolve(session.config.restore.flags),
        dry_run: args.dry_run,
    };
    let summary = session.history.restore_snapshot(&args.name, options)?;
    render(output, &summary, |s, w| write_summary(w, s))?;

    if summary.is_complete() {
        Ok(())
    } else {
        anyhow::bail!("{} restore groups failed", summary.failures.len())
    }
}
