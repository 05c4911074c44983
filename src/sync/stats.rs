//! Per-run bookkeeping.
//!
//! The `RunTracker` counts what happened to each candidate during a run and turns it into a
//! `SyncStats` summary for the report and the logs.

use crate::sync::events::CandidateOutcome;

use std::time::{Duration, Instant};

/// Tracks candidate outcomes during one run
#[derive(Debug, Clone)]
pub struct RunTracker {
	started: Instant,
	stats: SyncStats,
}

impl RunTracker {
	pub fn new() -> Self {
		Self {
			started: Instant::now(),
			stats: SyncStats::default(),
		}
	}

	/// Record the size of the candidate set
	pub fn record_candidates(&mut self, count: usize) {
		self.stats.candidates = count;
	}

	/// Record that one more batch was submitted
	pub fn record_batch(&mut self) {
		self.stats.batches += 1;
	}

	/// Record one candidate's outcome
	pub fn record(&mut self, outcome: &CandidateOutcome) {
		match outcome {
			CandidateOutcome::Synced => self.stats.synced += 1,
			CandidateOutcome::Rejected { .. } => self.stats.rejected += 1,
			CandidateOutcome::Skipped { .. } => self.stats.skipped += 1,
			CandidateOutcome::Superseded => self.stats.superseded += 1,
			CandidateOutcome::Dropped { .. } => self.stats.dropped += 1,
			CandidateOutcome::Failed { .. } => self.stats.failed += 1,
		}
	}

	/// Statistics so far, stamped with the elapsed time
	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			elapsed: self.started.elapsed(),
			..self.stats.clone()
		}
	}
}

impl Default for RunTracker {
	fn default() -> Self {
		Self::new()
	}
}

/// Statistics about one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
	pub candidates: usize,
	pub batches: usize,
	/// Accepted by the endpoint and committed locally
	pub synced: usize,
	/// Refused by the endpoint or lost in transport; retried next run
	pub rejected: usize,
	/// Nothing to send: already synced or no longer stored
	pub skipped: usize,
	/// Accepted, but changed locally meanwhile; still pending
	pub superseded: usize,
	/// Unreadable and removed
	pub dropped: usize,
	/// Local error while handling the candidate
	pub failed: usize,
	pub elapsed: Duration,
}

impl SyncStats {
	/// Get a human-readable summary of the run
	pub fn summary(&self) -> String {
		format!(
			"{} candidates in {} batches: {} synced, {} rejected, {} skipped{}{}{} ({} ms)",
			self.candidates,
			self.batches,
			self.synced,
			self.rejected,
			self.skipped,
			if self.superseded > 0 {
				format!(", {} superseded", self.superseded)
			} else {
				String::new()
			},
			if self.dropped > 0 {
				format!(", {} dropped", self.dropped)
			} else {
				String::new()
			},
			if self.failed > 0 {
				format!(", {} failed", self.failed)
			} else {
				String::new()
			},
			self.elapsed.as_millis()
		)
	}
}
