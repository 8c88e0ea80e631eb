//! `ks record`: apply one catalog mutation and seal it as a commit.

use super::Session;
use crate::output::{OutputMode, pretty_kv, render};
use anyhow::Context;
use clap::Args;
use keepsake_core::event::{Commit, EventKind, Impact};
use serde::Serialize;
use serde_json::Value;

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// Event kind, e.g. `tag.create` or `item.tag_add`.
    pub kind: String,

    /// JSON payload for the event.
    pub payload: String,

    /// Items touched, for checkpoint weighting.
    #[arg(long, default_value = "0")]
    pub items: u64,

    #[arg(long, default_value = "0")]
    pub collections: u64,

    #[arg(long, default_value = "0")]
    pub tags: u64,

    #[arg(long, default_value = "0")]
    pub groups: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recorded {
    event_id: String,
    commit: Option<Commit>,
    synced: bool,
    snapshot: Option<String>,
}

pub fn run_record(args: &RecordArgs, output: OutputMode, session: &Session) -> anyhow::Result<()> {
    let kind: EventKind = args.kind.parse()?;
    let payload: Value =
        serde_json::from_str(&args.payload).context("payload must be a JSON value")?;
    let impact = Impact {
        items: args.items,
        collections: args.collections,
        tags: args.tags,
        groups: args.groups,
    };

    let event_id = session.history.apply_event(kind, payload, impact)?;
    let flushed = session.history.flush()?;
    let recorded = match flushed {
        Some(outcome) => Recorded {
            event_id,
            commit: Some(outcome.commit),
            synced: outcome.synced,
            snapshot: outcome.snapshot,
        },
        None => Recorded {
            event_id,
            commit: None,
            synced: false,
            snapshot: None,
        },
    };

    render(output, &recorded, |r, w| {
        pretty_kv(w, "event", &r.event_id)?;
        if let Some(commit) = &r.commit {
            pretty_kv(w, "commit", &commit.commit_id)?;
        }
        pretty_kv(w, "synced", if r.synced { "yes" } else { "no (queued locally)" })?;
        if let Some(snapshot) = &r.snapshot {
            pretty_kv(w, "snapshot", snapshot)?;
        }
        Ok(())
    })
}
