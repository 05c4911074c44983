use crate::records::{QueueError, RepositoryError};
use crate::storage::StorageError;
use crate::sync::stats::SyncStats;

use std::time::Duration;

/// Default number of candidates submitted concurrently
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default bound on a single submission
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error taxonomy of a sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("No network connection")]
	ConnectivityUnavailable,

	#[error("No authentication token stored")]
	AuthenticationMissing,

	#[error("Endpoint rejected item {object_code} with status {status}")]
	SubmissionRejected { object_code: String, status: u16 },

	#[error("Submission of item {object_code} failed before a response: {reason}")]
	TransportError { object_code: String, reason: String },

	#[error("Stored item {object_code} is unreadable: {reason}")]
	LocalStorageCorruption { object_code: String, reason: String },

	#[error("Repository error: {0}")]
	RepositoryError(#[from] RepositoryError),

	#[error("Queue error: {0}")]
	QueueError(#[from] QueueError),

	#[error("Storage error: {0}")]
	StorageError(#[from] StorageError),
}

/// Overall result of a run, as reported to whoever triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	/// At least one record was accepted by the endpoint
	NewData,
	/// Nothing was accepted: no candidates, offline, every submission refused, or another run was
	/// already in flight
	NoData,
	/// The run could not begin
	Failed,
}

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Candidates submitted concurrently per batch
	pub batch_size: usize,
	/// Bound on a single submission; a timed out submission is retried on a later run
	pub request_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

/// What a single run did
#[derive(Debug)]
pub struct SyncReport {
	pub outcome: SyncOutcome,
	pub stats: SyncStats,
	/// The run yielded to one already in flight and did nothing
	pub coalesced: bool,
	/// Why the run stopped before processing candidates, if it did
	pub error: Option<SyncError>,
}

impl SyncReport {
	/// Report for a run that processed its candidates.
	pub fn completed(stats: SyncStats) -> Self {
		let outcome = if stats.synced > 0 {
			SyncOutcome::NewData
		} else {
			SyncOutcome::NoData
		};
		Self {
			outcome,
			stats,
			coalesced: false,
			error: None,
		}
	}

	/// Report for a run that stopped early. Only connectivity counts as a benign stop.
	pub fn aborted(stats: SyncStats, error: SyncError) -> Self {
		let outcome = match error {
			SyncError::ConnectivityUnavailable => SyncOutcome::NoData,
			_ => SyncOutcome::Failed,
		};
		Self {
			outcome,
			stats,
			coalesced: false,
			error: Some(error),
		}
	}

	/// Report for a trigger that arrived while another run was active.
	pub fn coalesced() -> Self {
		Self {
			outcome: SyncOutcome::NoData,
			stats: SyncStats::default(),
			coalesced: true,
			error: None,
		}
	}

	/// Whether this run left work behind without making any progress on it.
	pub fn is_stalled(&self) -> bool {
		match self.outcome {
			SyncOutcome::Failed => true,
			SyncOutcome::NewData => false,
			SyncOutcome::NoData => self.stats.rejected + self.stats.failed > 0,
		}
	}
}
