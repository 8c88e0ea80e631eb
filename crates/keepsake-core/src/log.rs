//! Remote monthly event logs.
//!
//! Events are mirrored into one JSONL blob per UTC month touched:
//!
//! ```text
//! events-2024-03.jsonl
//!   {"month":"2024-03","firstCommitTs":...,"firstCommitId":"..."}   <- header
//!   {"ts":...,"kind":"tag.create","payload":{...},"impact":{...},"size":...,"commitId":"..."}
//!   ...                                                              <- newest last
//! ```
//!
//! # Invariants
//!
//! - Line 0 is always the header; every other line is one event.
//! - Line order is commit-chronological, and within a commit, recording order.
//! - Every line ends with `\n`. Lines are kept as raw text so a parse/render
//!   cycle is byte-identical, which prune/reattach depends on.

use std::fmt;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, EventKind, Impact};

const LOG_PREFIX: &str = "events-";
const LOG_SUFFIX: &str = ".jsonl";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("monthly log {0} has no header line")]
    MissingHeader(String),

    #[error("monthly log {name} has an invalid header: {source}")]
    BadHeader {
        name: String,
        source: serde_json::Error,
    },

    #[error("failed to encode log line: {0}")]
    Encode(#[from] serde_json::Error),
}

/// UTC year-month, formatted `YYYY-MM`. Orders chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey(String);

impl MonthKey {
    /// Month containing the millisecond timestamp `ts`.
    #[must_use]
    pub fn from_millis(ts: i64) -> Self {
        let at = DateTime::from_timestamp_millis(ts).unwrap_or_default();
        Self(format!("{:04}-{:02}", at.year(), at.month()))
    }

    /// Parse a `YYYY-MM` string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (year, month) = raw.split_once('-')?;
        let valid = year.len() == 4
            && month.len() == 2
            && year.bytes().all(|b| b.is_ascii_digit())
            && matches!(month.parse::<u32>(), Ok(1..=12));
        valid.then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remote blob name of this month's log.
    #[must_use]
    pub fn log_name(&self) -> String {
        format!("{LOG_PREFIX}{}{LOG_SUFFIX}", self.0)
    }

    /// Month of a monthly-log blob name.
    #[must_use]
    pub fn from_log_name(name: &str) -> Option<Self> {
        Self::parse(name.strip_prefix(LOG_PREFIX)?.strip_suffix(LOG_SUFFIX)?)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogHeader {
    pub month: MonthKey,
    pub first_commit_ts: i64,
    pub first_commit_id: String,
}

/// One event as mirrored into a monthly log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub ts: i64,
    pub kind: EventKind,
    pub payload: Value,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub size: u64,
    pub commit_id: String,
}

impl From<&Event> for LogLine {
    fn from(event: &Event) -> Self {
        Self {
            ts: event.ts,
            kind: event.kind,
            payload: event.payload.clone(),
            impact: event.impact,
            size: event.size_bytes,
            commit_id: event.commit_id.clone(),
        }
    }
}

/// The fields boundary searches need. Decoding this never depends on the
/// event kind being known to this build.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinePosition {
    #[serde(default)]
    ts: i64,
    #[serde(default)]
    commit_id: String,
}

/// Where a commit ends inside a monthly log body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// Number of body lines at or before the commit.
    pub end: usize,
    /// `false` when no line carried the commit id and the timestamp
    /// heuristic was used instead.
    pub exact: bool,
}

/// A parsed monthly log: raw header text plus raw body lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyLog {
    header: String,
    lines: Vec<String>,
}

impl MonthlyLog {
    /// Start a fresh log whose header names the first commit written to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be encoded.
    pub fn new(header: &LogHeader) -> Result<Self, LogError> {
        Ok(Self {
            header: serde_json::to_string(header)?,
            lines: Vec::new(),
        })
    }

    /// Split blob content into header and body lines.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::MissingHeader`] for empty content.
    pub fn parse(name: &str, content: &str) -> Result<Self, LogError> {
        let trimmed = content.strip_suffix('\n').unwrap_or(content);
        if trimmed.is_empty() {
            return Err(LogError::MissingHeader(name.to_string()));
        }
        let mut parts = trimmed.split('\n');
        let header = parts.next().unwrap_or_default().to_string();
        Ok(Self {
            header,
            lines: parts.map(str::to_string).collect(),
        })
    }

    /// Decode the header line.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::BadHeader`] if the header is not valid JSON.
    pub fn header(&self, name: &str) -> Result<LogHeader, LogError> {
        serde_json::from_str(&self.header).map_err(|source| LogError::BadHeader {
            name: name.to_string(),
            source,
        })
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Append one event line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be encoded.
    pub fn push(&mut self, line: &LogLine) -> Result<(), LogError> {
        self.lines.push(serde_json::to_string(line)?);
        Ok(())
    }

    /// Full blob content: header plus body, each line newline-terminated.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.header.len() + 1 + self.lines.iter().map(|l| l.len() + 1).sum::<usize>(),
        );
        out.push_str(&self.header);
        out.push('\n');
        out.push_str(&render_lines(&self.lines));
        out
    }

    /// Copy of this log keeping the header and body lines in `range`.
    #[must_use]
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            header: self.header.clone(),
            lines: self.lines[range].to_vec(),
        }
    }

    /// Position just past the last line of `commit_id`.
    ///
    /// A commit may span several consecutive lines; the boundary is after the
    /// last of them. When no line carries the id (a corrupted or over-pruned
    /// month), the boundary falls after the last line stamped at or before
    /// `commit_ts`, and `exact` is `false`.
    #[must_use]
    pub fn boundary(&self, commit_id: &str, commit_ts: i64) -> Boundary {
        let positions: Vec<Option<LinePosition>> = self
            .lines
            .iter()
            .map(|l| serde_json::from_str(l).ok())
            .collect();

        if let Some(last) = positions
            .iter()
            .rposition(|p| p.as_ref().is_some_and(|p| p.commit_id == commit_id))
        {
            return Boundary {
                end: last + 1,
                exact: true,
            };
        }

        let end = positions
            .iter()
            .rposition(|p| p.as_ref().is_some_and(|p| p.ts <= commit_ts))
            .map_or(0, |i| i + 1);
        Boundary { end, exact: false }
    }
}

/// Body lines joined with a trailing newline each.
#[must_use]
pub fn render_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
