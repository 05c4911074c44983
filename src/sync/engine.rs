//! Sync engine: reconciles locally stored records with the pointing endpoint.
//!
//! A run checks connectivity and the stored token, collects candidates from both the pending queue
//! and a scan of unsynced records, and submits them in bounded batches. Candidates within a batch
//! are submitted concurrently on the current task; batches follow one another. Each candidate's
//! local state is only committed (mark synced, then dequeue) after its own submission succeeded, so
//! a run cut short at any point leaves every unfinished candidate pending for the next one.
//!
//! The engine owns no persistent state of its own. The only process-wide state it holds is the
//! in-flight flag that keeps two runs from overlapping.

use crate::records::{PendingQueue, Record, RecordRepository, RepositoryError, Session};
use crate::remote::{ConnectivityProbe, RecordSubmitter, SubmitError};
use crate::storage::KeyValueStore;
use crate::sync::{
	events::{CandidateOutcome, EventDispatcher, LoggingEventHandler, SyncEvent, SyncEventHandler},
	stats::RunTracker,
	types::{SyncConfig, SyncError, SyncReport},
};

use futures::future::join_all;
use itertools::Itertools;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Coordinates one sync run at a time over the repository, the queue and the remote endpoint.
pub struct SyncEngine {
	repository: RecordRepository,
	queue: PendingQueue,
	session: Session,
	submitter: Arc<dyn RecordSubmitter>,
	connectivity: Arc<dyn ConnectivityProbe>,
	config: SyncConfig,
	in_flight: AtomicBool,
	dispatcher: Mutex<EventDispatcher>,
}

impl SyncEngine {
	/// Create an engine over `store`. A logging event handler is always registered.
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		submitter: Arc<dyn RecordSubmitter>,
		connectivity: Arc<dyn ConnectivityProbe>,
		config: SyncConfig,
	) -> Self {
		Self::with_components(
			RecordRepository::new(store.clone()),
			PendingQueue::new(store.clone()),
			Session::new(store),
			submitter,
			connectivity,
			config,
		)
	}

	/// Create an engine from already constructed components sharing one store.
	pub fn with_components(
		repository: RecordRepository,
		queue: PendingQueue,
		session: Session,
		submitter: Arc<dyn RecordSubmitter>,
		connectivity: Arc<dyn ConnectivityProbe>,
		config: SyncConfig,
	) -> Self {
		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(Box::new(LoggingEventHandler));

		Self {
			repository,
			queue,
			session,
			submitter,
			connectivity,
			config,
			in_flight: AtomicBool::new(false),
			dispatcher: Mutex::new(dispatcher),
		}
	}

	/// Register an additional event handler.
	pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
		self.dispatcher.lock().await.register_handler(handler);
	}

	pub fn repository(&self) -> &RecordRepository {
		&self.repository
	}

	pub fn queue(&self) -> &PendingQueue {
		&self.queue
	}

	pub fn config(&self) -> &SyncConfig {
		&self.config
	}

	/// Whether a run is currently in flight
	pub fn is_running(&self) -> bool {
		self.in_flight.load(Ordering::Acquire)
	}

	/// Execute one run.
	///
	/// Never fails: precondition failures and per-candidate errors are folded into the report. A
	/// call made while another run is active returns a coalesced "no data" report immediately.
	pub async fn run(&self) -> SyncReport {
		let Some(_guard) = RunGuard::acquire(&self.in_flight) else {
			info!("Sync already in progress, skipping this trigger");
			return SyncReport::coalesced();
		};

		info!("Sync started");
		let mut tracker = RunTracker::new();

		let report = match self.reconcile(&mut tracker).await {
			Ok(()) => SyncReport::completed(tracker.get_stats()),
			Err(SyncError::ConnectivityUnavailable) => {
				info!("No internet connection. Skipping sync.");
				SyncReport::aborted(tracker.get_stats(), SyncError::ConnectivityUnavailable)
			}
			Err(e) => {
				warn!("Sync could not start: {}", e);
				SyncReport::aborted(tracker.get_stats(), e)
			}
		};

		self.dispatch(SyncEvent::RunCompleted {
			outcome: report.outcome,
			stats: report.stats.clone(),
		})
		.await;

		report
	}

	async fn reconcile(&self, tracker: &mut RunTracker) -> Result<(), SyncError> {
		if !self.connectivity.network_state().await.can_sync() {
			return Err(SyncError::ConnectivityUnavailable);
		}

		// One token per run; a missing token stops the run before anything is sent
		let token = self
			.session
			.token()
			.await?
			.ok_or(SyncError::AuthenticationMissing)?;

		let candidates = self.collect_candidates().await?;
		tracker.record_candidates(candidates.len());
		if candidates.is_empty() {
			info!("Nothing to synchronize");
			return Ok(());
		}

		self.dispatch(SyncEvent::RunStarted {
			candidates: candidates.len(),
		})
		.await;

		for batch in candidates.chunks(self.config.batch_size.max(1)) {
			tracker.record_batch();

			let outcomes = join_all(
				batch
					.iter()
					.map(|object_code| self.process_candidate(object_code, &token)),
			)
			.await;

			for (object_code, outcome) in batch.iter().zip(outcomes) {
				tracker.record(&outcome);
				self.dispatch(SyncEvent::CandidateProcessed {
					object_code: object_code.clone(),
					outcome,
				})
				.await;
			}
		}

		Ok(())
	}

	/// Queue order first, then anything the record scan found that the queue missed.
	async fn collect_candidates(&self) -> Result<Vec<String>, SyncError> {
		let queued = match self.queue.list().await {
			Ok(queued) => queued,
			Err(e) => {
				warn!("Sync queue unreadable, relying on the record scan: {}", e);
				Vec::new()
			}
		};

		let scan = self.repository.scan_unsynced().await?;

		Ok(queued
			.into_iter()
			.chain(scan.records.into_iter().map(|record| record.object_code))
			.chain(scan.corrupt)
			.unique()
			.collect())
	}

	async fn process_candidate(&self, object_code: &str, token: &str) -> CandidateOutcome {
		let record = match self.repository.get(object_code).await {
			Ok(Some(record)) => record,
			Ok(None) => {
				return self
					.settle_without_submit(object_code, "record no longer exists")
					.await;
			}
			Err(RepositoryError::Corrupt { source, .. }) => {
				return self.drop_corrupt(object_code, source.to_string()).await;
			}
			Err(e) => {
				return CandidateOutcome::Failed {
					reason: e.to_string(),
				};
			}
		};

		if record.synced {
			return self
				.settle_without_submit(object_code, "already synced")
				.await;
		}

		let submission = tokio::time::timeout(
			self.config.request_timeout,
			self.submitter.submit(&record, token),
		)
		.await
		.unwrap_or_else(|_| Err(SubmitError::Timeout(self.config.request_timeout)));

		match submission {
			Ok(()) => self.commit(&record).await,
			Err(SubmitError::PictureError { path, source }) => CandidateOutcome::Failed {
				reason: format!("picture {} could not be read: {}", path, source),
			},
			Err(SubmitError::Rejected { status }) => CandidateOutcome::Rejected {
				reason: SyncError::SubmissionRejected {
					object_code: object_code.to_string(),
					status,
				}
				.to_string(),
			},
			Err(e) => CandidateOutcome::Rejected {
				reason: SyncError::TransportError {
					object_code: object_code.to_string(),
					reason: e.to_string(),
				}
				.to_string(),
			},
		}
	}

	/// Commit only the state that was sent. A record saved again during the submission keeps its
	/// queue entry and goes out with the next run.
	async fn commit(&self, submitted: &Record) -> CandidateOutcome {
		let object_code = submitted.object_code.as_str();
		match self.repository.mark_synced_if_unchanged(submitted).await {
			Ok(true) => {}
			Ok(false) => return CandidateOutcome::Superseded,
			Err(e) => {
				return CandidateOutcome::Failed {
					reason: format!("accepted remotely but not marked synced: {}", e),
				};
			}
		}
		// A leftover queue entry for a synced record is cleared by the next run
		if let Err(e) = self.queue.dequeue(object_code).await {
			return CandidateOutcome::Failed {
				reason: format!("marked synced but still queued: {}", e),
			};
		}
		CandidateOutcome::Synced
	}

	async fn settle_without_submit(&self, object_code: &str, reason: &str) -> CandidateOutcome {
		match self.queue.dequeue(object_code).await {
			Ok(()) => CandidateOutcome::Skipped {
				reason: reason.to_string(),
			},
			Err(e) => CandidateOutcome::Failed {
				reason: e.to_string(),
			},
		}
	}

	async fn drop_corrupt(&self, object_code: &str, reason: String) -> CandidateOutcome {
		let error = SyncError::LocalStorageCorruption {
			object_code: object_code.to_string(),
			reason,
		};

		if let Err(e) = self.repository.remove(object_code).await {
			return CandidateOutcome::Failed {
				reason: format!("{}; removal failed: {}", error, e),
			};
		}
		if let Err(e) = self.queue.dequeue(object_code).await {
			return CandidateOutcome::Failed {
				reason: format!("{}; dequeue failed: {}", error, e),
			};
		}
		CandidateOutcome::Dropped {
			reason: error.to_string(),
		}
	}

	async fn dispatch(&self, event: SyncEvent) {
		self.dispatcher.lock().await.dispatch(&event).await;
	}
}

/// Holds the in-flight flag for the duration of a run
struct RunGuard<'a> {
	flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
	fn acquire(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self { flag })
	}
}

impl Drop for RunGuard<'_> {
	fn drop(&mut self) {
		self.flag.store(false, Ordering::Release);
	}
}
