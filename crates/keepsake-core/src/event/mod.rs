//! Event and commit data model.
//!
//! An [`Event`] is one recorded catalog mutation. Events are grouped into a
//! [`Commit`] when the batcher flushes; the commit is the unit of local
//! transaction and of remote log grouping.
//!
//! Event ids have the form `<commitId>:<seq>` where `seq` is the recording
//! order within the commit, starting at 0.

pub mod kind;
pub mod payload;

pub use kind::{EventKind, UnknownEventKind};
pub use payload::{Mutation, PayloadError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rows touched by a mutation, per entity family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Impact {
    #[serde(alias = "videos")]
    pub items: u64,
    #[serde(alias = "channels")]
    pub collections: u64,
    pub tags: u64,
    pub groups: u64,
}

impl Impact {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.items + self.collections + self.tags + self.groups
    }

    pub const fn accumulate(&mut self, other: &Self) {
        self.items += other.items;
        self.collections += other.collections;
        self.tags += other.tags;
        self.groups += other.groups;
    }
}

/// A single persisted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// `<commitId>:<seq>`.
    pub id: String,
    pub commit_id: String,
    pub seq: u32,
    /// Milliseconds since the Unix epoch, taken when the event was recorded.
    pub ts: i64,
    pub kind: EventKind,
    pub payload: Value,
    #[serde(default)]
    pub impact: Impact,
    pub size_bytes: u64,
    /// Reserved for a reversible-apply format. Always `null`; never read.
    #[serde(default)]
    pub inverse: Option<Value>,
}

impl Event {
    #[must_use]
    pub fn event_id(commit_id: &str, seq: u32) -> String {
        format!("{commit_id}:{seq}")
    }
}

/// Summed impact of a commit plus its event count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitCounts {
    pub events: u64,
    #[serde(alias = "videos")]
    pub items: u64,
    #[serde(alias = "channels")]
    pub collections: u64,
    pub tags: u64,
    pub groups: u64,
}

/// An atomic batch of events flushed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub commit_id: String,
    /// Milliseconds since the Unix epoch, taken when the batch was sealed.
    pub ts: i64,
    /// `kind×count` entries joined by `, `, in first-seen order.
    pub summary: String,
    pub weight: u64,
    pub size_bytes: u64,
    pub counts: CommitCounts,
}

impl Commit {
    /// Build the commit record for a batch of events sharing `commit_id`.
    #[must_use]
    pub fn from_events(commit_id: &str, ts: i64, weight: u64, events: &[Event]) -> Self {
        let mut impact = Impact::default();
        let mut size_bytes = 0;
        for event in events {
            impact.accumulate(&event.impact);
            size_bytes += event.size_bytes;
        }

        Self {
            commit_id: commit_id.to_string(),
            ts,
            summary: summarize(events.iter().map(|e| e.kind)),
            weight,
            size_bytes,
            counts: CommitCounts {
                events: events.len() as u64,
                items: impact.items,
                collections: impact.collections,
                tags: impact.tags,
                groups: impact.groups,
            },
        }
    }
}

/// Byte length of the JSON encoding of `{kind, payload, impact}`.
#[must_use]
pub fn encoded_size(kind: EventKind, payload: &Value, impact: &Impact) -> u64 {
    #[derive(Serialize)]
    struct Measured<'a> {
        kind: EventKind,
        payload: &'a Value,
        impact: &'a Impact,
    }

    serde_json::to_vec(&Measured {
        kind,
        payload,
        impact,
    })
    .map_or(0, |bytes| bytes.len() as u64)
}

/// Heuristic cost of an event: rows touched plus payload kilobytes, rounded up.
#[must_use]
pub const fn event_weight(impact: &Impact, size_bytes: u64) -> u64 {
    impact.total() + size_bytes.div_ceil(1024)
}

/// `kind×count` for each distinct kind, in first-seen order.
#[must_use]
pub fn summarize(kinds: impl IntoIterator<Item = EventKind>) -> String {
    let mut tally: Vec<(EventKind, usize)> = Vec::new();
    for kind in kinds {
        match tally.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, n)) => *n += 1,
            None => tally.push((kind, 1)),
        }
    }

    tally
        .iter()
        .map(|(kind, n)| format!("{kind}×{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: u32, kind: EventKind, impact: Impact) -> Event {
        Event {
            id: Event::event_id("c1", seq),
            commit_id: "c1".into(),
            seq,
            ts: 1_700_000_000_000,
            kind,
            payload: json!({}),
            impact,
            size_bytes: 100,
            inverse: None,
        }
    }

    #[test]
    fn weight_adds_rows_and_rounded_kilobytes() {
        let impact = Impact {
            items: 3,
            tags: 1,
            ..Impact::default()
        };
        assert_eq!(event_weight(&impact, 0), 4);
        assert_eq!(event_weight(&impact, 1), 5);
        assert_eq!(event_weight(&impact, 1024), 5);
        assert_eq!(event_weight(&impact, 1025), 6);
    }

    #[test]
    fn encoded_size_matches_json_length() {
        let payload = json!({"name": "music"});
        let impact = Impact::default();
        let expected = serde_json::to_string(&json!({
            "kind": "tag.create",
            "payload": {"name": "music"},
            "impact": {"items": 0, "collections": 0, "tags": 0, "groups": 0}
        }))
        .expect("encode")
        .len() as u64;
        assert_eq!(encoded_size(EventKind::TagCreate, &payload, &impact), expected);
    }

    #[test]
    fn summary_keeps_first_seen_order() {
        let summary = summarize([
            EventKind::ItemTagAdd,
            EventKind::TagCreate,
            EventKind::ItemTagAdd,
        ]);
        assert_eq!(summary, "item.tag_add×2, tag.create×1");
    }

    #[test]
    fn commit_sums_impact_and_counts_events() {
        let events = vec![
            event(
                0,
                EventKind::TagCreate,
                Impact {
                    tags: 1,
                    ..Impact::default()
                },
            ),
            event(
                1,
                EventKind::ItemTagAdd,
                Impact {
                    items: 2,
                    ..Impact::default()
                },
            ),
        ];
        let commit = Commit::from_events("c1", 42, 7, &events);
        assert_eq!(commit.counts.events, 2);
        assert_eq!(commit.counts.items, 2);
        assert_eq!(commit.counts.tags, 1);
        assert_eq!(commit.size_bytes, 200);
        assert_eq!(commit.weight, 7);
        assert_eq!(commit.summary, "tag.create×1, item.tag_add×1");
    }

    #[test]
    fn impact_accepts_legacy_aliases() {
        let impact: Impact =
            serde_json::from_value(json!({"videos": 2, "channels": 1})).expect("decode");
        assert_eq!(impact.items, 2);
        assert_eq!(impact.collections, 1);
        assert_eq!(impact.total(), 3);
    }
}
