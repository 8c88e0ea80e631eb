//! `ks backup` and `ks snapshots`.

use super::Session;
use crate::output::{OutputMode, format_ms, pretty_kv, pretty_section, render, render_mode};

pub fn run_backup(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let outcome = session.history.backup()?;
    render(output, &outcome, |o, w| {
        pretty_kv(w, "snapshot", &o.snapshot)?;
        pretty_kv(w, "synced", o.synced.len().to_string())
    })
}

pub fn run_snapshots(output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let snapshots = session.history.list_snapshots()?;
    render_mode(
        output,
        &snapshots,
        |snapshots, w| {
            for s in snapshots {
                writeln!(w, "{}\t{}\t{}", s.name, s.at, s.size)?;
            }
            Ok(())
        },
        |snapshots, w| {
            pretty_section(w, &format!("Snapshots ({})", snapshots.len()))?;
            for s in snapshots {
                writeln!(w, "{:<44} {}  {:>9} B", s.name, format_ms(s.at), s.size)?;
            }
            Ok(())
        },
    )
}
