#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::Session;
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ks: durable, point-in-time recoverable catalog history",
    long_about = None
)]
struct Cli {
    /// Data directory (default: $KEEPSAKE_DIR, then the platform data dir).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Read",
        about = "Show where history lives and what is queued",
        after_help = "EXAMPLES:\n    ks status\n    ks status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Read",
        about = "Print the live catalog",
        after_help = "EXAMPLES:\n    ks catalog --json"
    )]
    Catalog,

    #[command(
        next_help_heading = "Read",
        about = "List commits, newest first",
        after_help = "EXAMPLES:\n    # Last 20 commits\n    ks log\n\n    # Last 5, machine-readable\n    ks log -n 5 --json"
    )]
    Log(cmd::log::LogArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one commit and its events",
        after_help = "EXAMPLES:\n    ks show c18d2f3a1b0-0a1b2c3d"
    )]
    Show(cmd::log::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "List remote snapshots, newest first"
    )]
    Snapshots,

    #[command(
        next_help_heading = "Write",
        about = "Apply a catalog mutation and commit it",
        long_about = "Apply one mutation to the live catalog, seal it as a commit, and push it to the remote log.",
        after_help = "EXAMPLES:\n    ks record tag.create '{\"name\":\"music\"}'\n    ks record item.tag_add '{\"id\":\"v1\",\"tags\":[\"music\"]}' --items 1"
    )]
    Record(cmd::record::RecordArgs),

    #[command(next_help_heading = "Write", about = "Seal buffered events into a commit")]
    Flush,

    #[command(
        next_help_heading = "Sync",
        about = "Push unsynced commits to the remote logs"
    )]
    Sync,

    #[command(
        next_help_heading = "Sync",
        about = "Push unsynced commits, then write a snapshot"
    )]
    Backup,

    #[command(
        next_help_heading = "Recovery",
        about = "Return the catalog to its state as of a commit",
        long_about = "Rebuild the catalog as of a commit from the newest earlier snapshot plus the logged events. Counts the changes unless --apply is given.",
        after_help = "EXAMPLES:\n    # Preview\n    ks revert c18d2f3a1b0-0a1b2c3d\n\n    # Write it, merging item tags\n    ks revert c18d2f3a1b0-0a1b2c3d --apply --item-tags merge"
    )]
    Revert(cmd::revert::RevertArgs),

    #[command(
        next_help_heading = "Recovery",
        about = "Restore a remote snapshot into the live catalog",
        after_help = "EXAMPLES:\n    # Names come from `ks snapshots`\n    ks restore snapshots/settings-1706659200000.json --mode merge --dry-run"
    )]
    Restore(cmd::restore::RestoreArgs),

    #[command(
        next_help_heading = "Retention",
        about = "Write all history up to a commit to a bundle file"
    )]
    Export(cmd::bundle::ExportArgs),

    #[command(
        next_help_heading = "Retention",
        about = "Delete all history up to a commit",
        after_help = "EXAMPLES:\n    ks export c18d2f3a1b0-0a1b2c3d -o old.json\n    ks prune c18d2f3a1b0-0a1b2c3d --yes"
    )]
    Prune(cmd::bundle::PruneArgs),

    #[command(
        next_help_heading = "Retention",
        about = "Splice an exported bundle back in front of pruned history"
    )]
    Reattach(cmd::bundle::ReattachArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KEEPSAKE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "keepsake=debug,info"
        } else {
            "keepsake=info,warn"
        })
    });

    let format = env::var("KEEPSAKE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let session = Session::open(cli.data_dir.as_deref())?;
    match &cli.command {
        Commands::Status => cmd::status::run_status(output, &session),
        Commands::Catalog => cmd::status::run_catalog(output, &session),
        Commands::Log(args) => cmd::log::run_log(args, output, &session),
        Commands::Show(args) => cmd::log::run_show(args, output, &session),
        Commands::Snapshots => cmd::backup::run_snapshots(output, &session),
        Commands::Record(args) => cmd::record::run_record(args, output, &session),
        Commands::Flush => cmd::sync::run_flush(output, &session),
        Commands::Sync => cmd::sync::run_sync(output, &session),
        Commands::Backup => cmd::backup::run_backup(output, &session),
        Commands::Revert(args) => cmd::revert::run_revert(args, output, &session),
        Commands::Restore(args) => cmd::restore::run_restore(args, output, &session),
        Commands::Export(args) => cmd::bundle::run_export(args, output, &session),
        Commands::Prune(args) => cmd::bundle::run_prune(args, output, &session),
        Commands::Reattach(args) => cmd::bundle::run_reattach(args, output, &session),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = resolve_output_mode(cli.format, cli.json);

    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = render_error(output, &CliError::from(&err));
            ExitCode::FAILURE
        }
    }
}
