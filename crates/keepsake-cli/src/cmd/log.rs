//! `ks log` and `ks show`: commit inspection.

use super::Session;
use crate::output::{OutputMode, format_ms, pretty_kv, pretty_section, render, render_mode};
use clap::Args;
use keepsake_core::event::{Commit, Event};
use serde::Serialize;

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Maximum number of commits to show, newest first.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Commit id to inspect.
    pub commit_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitDetail<'a> {
    commit: &'a Commit,
    events: &'a [Event],
}

pub fn run_log(args: &LogArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let commits = session.history.list_commits(args.limit)?;
    render_mode(
        output,
        &commits,
        |commits, w| {
            for c in commits {
                writeln!(w, "{}\t{}\t{}\t{}", c.commit_id, c.ts, c.weight, c.summary)?;
            }
            Ok(())
        },
        |commits, w| {
            if commits.is_empty() {
                return writeln!(w, "No commits yet.");
            }
            for c in commits {
                writeln!(
                    w,
                    "{}  {}  w={:<6} {}",
                    c.commit_id,
                    format_ms(c.ts),
                    c.weight,
                    c.summary
                )?;
            }
            Ok(())
        },
    )
}

pub fn run_show(args: &ShowArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let events = session.history.get_commit_events(&args.commit_id)?;
    let commit = session
        .history
        .store()
        .get_commit(&args.commit_id)?
        .ok_or_else(|| keepsake_core::HistoryError::CommitNotFound(args.commit_id.clone()))?;

    let detail = CommitDetail {
        commit: &commit,
        events: &events,
    };
    render(output, &detail, |detail, w| {
        pretty_section(w, &format!("Commit {}", detail.commit.commit_id))?;
        pretty_kv(w, "time", format_ms(detail.commit.ts))?;
        pretty_kv(w, "summary", &detail.commit.summary)?;
        pretty_kv(w, "weight", detail.commit.weight.to_string())?;
        pretty_kv(w, "size", format!("{} bytes", detail.commit.size_bytes))?;
        writeln!(w)?;
        for event in detail.events {
            writeln!(w, "  #{:<3} {:<22} {}", event.seq, event.kind, event.payload)?;
        }
        Ok(())
    })
}
