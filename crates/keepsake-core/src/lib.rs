//! keepsake-core: durable, point-in-time recoverable history for a personal
//! catalog.
//!
//! Mutations are batched into commits in a local SQLite store, mirrored into
//! monthly JSONL logs on a remote blob store, and checkpointed by periodic
//! full snapshots. [`history::History`] is the entry point.
//!
//! # Conventions
//!
//! - **Errors**: each module defines a `thiserror` enum; user-facing
//!   operations return [`error::HistoryError`], which maps to a stable
//!   [`error::ErrorCode`].
//! - **Logging**: `tracing` macros with structured fields.

pub mod batcher;
pub mod catalog;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod history;
pub mod lock;
pub mod log;
pub mod prune;
pub mod remote;
pub mod replay;
pub mod restore;
pub mod snapshot;
pub mod sync;

pub use error::{ErrorCode, HistoryError};
pub use history::History;
