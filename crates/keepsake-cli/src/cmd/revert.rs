//! `ks revert`: point-in-time recovery to a commit.

use super::{ApplyFlagArgs, Session};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};
use clap::Args;
use keepsake_core::history::RevertOptions;
use keepsake_core::restore::{Counts, RestoreSummary};
use std::io::{self, Write};

#[derive(Args, Debug, Clone)]
pub struct RevertArgs {
    /// Commit whose state the catalog should return to.
    pub commit_id: String,

    /// Write the reconstructed state. Without this flag only the differences
    /// are counted.
    #[arg(long)]
    pub apply: bool,

    #[command(flatten)]
    pub flags: ApplyFlagArgs,
}

pub fn run_revert(args: &RevertArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let options = RevertOptions {
        apply: args.apply,
        flags: args.flags.resolve(session.config.restore.flags),
    };
    let outcome = session.history.revert(&args.commit_id, options)?;

    render(output, &outcome, |o, w| {
        pretty_section(w, &format!("Revert to {}", o.commit.commit_id))?;
        pretty_kv(w, "baseline", &o.replay.baseline)?;
        pretty_kv(w, "replayed", o.replay.applied.to_string())?;
        if o.replay.malformed > 0 {
            pretty_kv(w, "malformed", o.replay.malformed.to_string())?;
        }
        if !o.replay.exact_boundary {
            pretty_kv(w, "boundary", "timestamp fallback")?;
        }
        writeln!(w)?;
        write_summary(w, &o.summary)
    })?;

    if outcome.summary.is_complete() {
        Ok(())
    } else {
        anyhow::bail!("{} restore groups failed", outcome.summary.failures.len())
    }
}

/// Shared by `revert` and `restore`.
pub fn write_summary(w: &mut dyn Write, summary: &RestoreSummary) -> io::Result<()> {
    let heading = if summary.dry_run { "Would change" } else { "Changed" };
    writeln!(w, "{heading}:")?;
    let rows: [(&str, Counts); 6] = [
        ("tags", summary.tags),
        ("tag groups", summary.tag_groups),
        ("presets", summary.presets),
        ("collections", summary.collections),
        ("items", summary.items),
        ("pending", summary.pending),
    ];
    for (name, counts) in rows {
        writeln!(
            w,
            "  {name:<12} +{} ~{} -{}",
            counts.created, counts.updated, counts.cleared
        )?;
    }
    for failure in &summary.failures {
        writeln!(w, "  failed {}: {}", failure.group, failure.error)?;
    }
    Ok(())
}
