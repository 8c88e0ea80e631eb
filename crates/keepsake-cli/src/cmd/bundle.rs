//! `ks export`, `ks prune`, and `ks reattach`: cutting old history off and
//! splicing it back.

use super::Session;
use crate::output::{OutputMode, pretty_kv, render};
use anyhow::Context;
use clap::Args;
use keepsake_core::prune::HistoryBundle;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Last commit to include.
    pub commit_id: String,

    /// Bundle file to write. Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PruneArgs {
    /// Last commit to delete.
    pub commit_id: String,

    /// Confirm that history up to the commit is deleted. Export it first to
    /// keep a copy.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReattachArgs {
    /// Bundle file written by `ks export`.
    pub bundle: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Exported {
    path: PathBuf,
    cutoff_commit_id: String,
    logs: usize,
    snapshots: usize,
    commits: usize,
}

pub fn run_export(args: &ExportArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let bundle = session.history.export_up_to(&args.commit_id)?;

    let Some(path) = &args.output else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &bundle)?;
        writeln!(out)?;
        return Ok(());
    };

    let encoded = serde_json::to_vec_pretty(&bundle)?;
    fs::write(path, encoded).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote history bundle");

    let exported = Exported {
        path: path.clone(),
        cutoff_commit_id: bundle.cutoff_commit_id,
        logs: bundle.logs.len(),
        snapshots: bundle.snapshots.len(),
        commits: bundle.commits.len(),
    };
    render(output, &exported, |e, w| {
        pretty_kv(w, "bundle", e.path.display().to_string())?;
        pretty_kv(w, "cutoff", &e.cutoff_commit_id)?;
        pretty_kv(
            w,
            "contents",
            format!("{} logs, {} snapshots, {} commits", e.logs, e.snapshots, e.commits),
        )
    })
}

pub fn run_prune(args: &PruneArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    if !args.yes {
        anyhow::bail!(
            "prune deletes all history up to {}; rerun with --yes (run `ks export` first to keep a copy)",
            args.commit_id
        );
    }
    let report = session.history.prune(&args.commit_id)?;
    render(output, &report, |r, w| {
        pretty_kv(w, "cutoff", &r.commit_id)?;
        pretty_kv(w, "logs", r.deleted_logs.len().to_string())?;
        pretty_kv(w, "snapshots", r.deleted_snapshots.len().to_string())?;
        pretty_kv(w, "lines", r.trimmed_lines.to_string())?;
        pretty_kv(w, "commits", r.local_commits_removed.to_string())
    })
}

pub fn run_reattach(args: &ReattachArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let raw = fs::read(&args.bundle)
        .with_context(|| format!("Failed to read {}", args.bundle.display()))?;
    let bundle: HistoryBundle = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a history bundle", args.bundle.display()))?;

    let report = session.history.reattach(&bundle)?;
    render(output, &report, |r, w| {
        pretty_kv(w, "cutoff", &r.cutoff_commit_id)?;
        pretty_kv(w, "logs", r.logs.len().to_string())?;
        pretty_kv(w, "snapshots", r.snapshots.len().to_string())?;
        pretty_kv(w, "commits", r.commits_imported.to_string())
    })
}
