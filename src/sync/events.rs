//! Event system for sync runs.
//!
//! The engine reports what happens during a run as `SyncEvent`s instead of acting on side channels
//! itself. Handlers registered on the `EventDispatcher` receive every event in registration order;
//! logging is one such handler, and embedders can add their own (status badges, metrics) without
//! touching the engine.

use crate::sync::SyncError;
use crate::sync::stats::SyncStats;
use crate::sync::types::SyncOutcome;

use tracing::{debug, error, info, warn};

/// What happened to a single candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
	/// Accepted remotely, marked synced and dequeued
	Synced,
	/// Refused, timed out or lost in transport; left pending
	Rejected { reason: String },
	/// Nothing to submit
	Skipped { reason: String },
	/// Accepted remotely, but the stored record changed meanwhile; left pending
	Superseded,
	/// Stored data was unreadable and has been removed
	Dropped { reason: String },
	/// Local failure while handling the candidate
	Failed { reason: String },
}

/// Events that occur during a sync run
#[derive(Debug, Clone)]
pub enum SyncEvent {
	/// Preconditions passed and candidates were collected
	RunStarted { candidates: usize },
	/// A candidate was processed
	CandidateProcessed {
		object_code: String,
		outcome: CandidateOutcome,
	},
	/// The run finished, successfully or not
	RunCompleted {
		outcome: SyncOutcome,
		stats: SyncStats,
	},
}

/// Receives the events of every run, e.g. to refresh a status badge.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

	/// Label used when a handler error is logged
	fn name(&self) -> &'static str;
}

/// Fans run events out to the registered handlers.
pub struct EventDispatcher {
	handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
	pub fn new() -> Self {
		Self {
			handlers: Vec::new(),
		}
	}

	/// Add a handler; it sees events after every handler added before it.
	pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
		self.handlers.push(handler);
	}

	/// Deliver `event` to each handler in turn. A handler error is logged and never reaches the
	/// run or the handlers after it.
	pub async fn dispatch(&mut self, event: &SyncEvent) {
		for handler in &mut self.handlers {
			if let Err(e) = handler.handle(event).await {
				error!("Handler {} failed to process event: {}", handler.name(), e);
			}
		}
	}
}

impl Default for EventDispatcher {
	fn default() -> Self {
		Self::new()
	}
}

/// Writes every event to the log.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
		match event {
			SyncEvent::RunStarted { candidates } => {
				info!("Synchronizing {} pending items", candidates);
			}
			SyncEvent::CandidateProcessed {
				object_code,
				outcome,
			} => match outcome {
				CandidateOutcome::Synced => info!("Synchronized item: {}", object_code),
				CandidateOutcome::Rejected { reason } => {
					warn!("Failed to synchronize item {}: {}", object_code, reason)
				}
				CandidateOutcome::Skipped { reason } => {
					debug!("Skipped item {}: {}", object_code, reason)
				}
				CandidateOutcome::Superseded => info!(
					"Item {} changed while it was being sent, keeping it for the next run",
					object_code
				),
				CandidateOutcome::Dropped { reason } => warn!(
					"Dropped unreadable item {} from local storage: {}",
					object_code, reason
				),
				CandidateOutcome::Failed { reason } => {
					error!("Error synchronizing item {}: {}", object_code, reason)
				}
			},
			SyncEvent::RunCompleted { outcome, stats } => {
				info!("Sync completed with result {:?}: {}", outcome, stats.summary());
			}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"LoggingEventHandler"
	}
}
