//! Synchronization of locally stored records with the remote endpoint.
//!
//! - `engine`: the `SyncEngine` and its `run()` reconciliation pass.
//! - `events`: events emitted during a run and the dispatcher delivering them to handlers.
//! - `stats`: per-run counters and their summary.
//! - `types`: configuration, outcome, report and error types.

/// One run at a time over queue, repository and endpoint
pub mod engine;
/// Event system for decoupled reporting during a run
pub mod events;
/// Tracks what happened to each candidate
pub mod stats;
/// Configuration, outcomes and errors
pub mod types;

pub use engine::SyncEngine;
pub use events::{CandidateOutcome, EventDispatcher, LoggingEventHandler, SyncEvent, SyncEventHandler};
pub use stats::SyncStats;
pub use types::*;
