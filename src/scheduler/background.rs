//! Periodic background invocation of the sync engine.
//!
//! The scheduler keeps at most one periodic loop alive. Its body is a single `SyncTask::run()` per
//! tick; the loop awaits each run before sleeping again, so ticks never overlap. The registration
//! itself is persisted in the store so a restarted process can pick it up again with `restore()`.

use crate::storage::{KeyValueStore, StorageError};
use crate::sync::{SyncEngine, SyncReport};

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name of the periodic sync task
pub const BACKGROUND_SYNC_TASK: &str = "background-sync";

/// Default minimum interval between two periodic runs
pub const DEFAULT_MINIMUM_INTERVAL: Duration = Duration::from_secs(60);

/// Default ceiling for the delay after repeated unproductive runs
pub const DEFAULT_MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Store key holding the persisted registration of a task
pub fn registration_key(task: &str) -> String {
	format!("background_task:{}", task)
}

/// Work performed on every tick.
#[async_trait::async_trait]
pub trait SyncTask: Send + Sync {
	async fn run(&self) -> SyncReport;
}

#[async_trait::async_trait]
impl SyncTask for SyncEngine {
	async fn run(&self) -> SyncReport {
		SyncEngine::run(self).await
	}
}

/// Errors raised by the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
	#[error("Storage error: {0}")]
	StorageError(#[from] StorageError),

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),
}

/// Options of the periodic registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
	/// Minimum delay between two runs
	#[serde(rename = "minimumIntervalMs", with = "duration_millis")]
	pub minimum_interval: Duration,
	/// Drop the registration when the process exits
	pub stop_on_terminate: bool,
	/// Re-register automatically when the process starts again
	pub start_on_boot: bool,
}

impl Default for TaskOptions {
	fn default() -> Self {
		Self {
			minimum_interval: DEFAULT_MINIMUM_INTERVAL,
			stop_on_terminate: false,
			start_on_boot: true,
		}
	}
}

/// Result of a registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
	/// A new periodic loop was started
	Registered,
	/// A loop was already running; nothing changed
	AlreadyRegistered,
}

struct ActiveTask {
	options: TaskOptions,
	shutdown: watch::Sender<bool>,
	handle: JoinHandle<()>,
}

/// Owns the periodic sync loop and its persisted registration.
pub struct BackgroundScheduler {
	store: Arc<dyn KeyValueStore>,
	task: Arc<dyn SyncTask>,
	max_backoff_interval: Duration,
	active: Mutex<Option<ActiveTask>>,
}

impl BackgroundScheduler {
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		task: Arc<dyn SyncTask>,
		max_backoff_interval: Duration,
	) -> Self {
		Self {
			store,
			task,
			max_backoff_interval,
			active: Mutex::new(None),
		}
	}

	/// Install the periodic loop. Calling this while a loop is running changes nothing.
	pub async fn register(&self, options: TaskOptions) -> Result<Registration, SchedulerError> {
		let mut active = self.active.lock().await;
		if let Some(task) = active.as_ref() {
			if !task.handle.is_finished() {
				debug!("Background sync already registered");
				return Ok(Registration::AlreadyRegistered);
			}
		}

		self.persist(&options).await?;

		let (shutdown, shutdown_rx) = watch::channel(false);
		let handle = tokio::spawn(periodic_loop(
			self.task.clone(),
			options.minimum_interval,
			self.max_backoff_interval,
			shutdown_rx,
		));

		info!(
			"Background sync registered (minimum interval {:?}, stop on terminate: {}, start on boot: {})",
			options.minimum_interval, options.stop_on_terminate, options.start_on_boot
		);
		*active = Some(ActiveTask {
			options,
			shutdown,
			handle,
		});
		Ok(Registration::Registered)
	}

	/// Whether a periodic loop is running in this process
	pub async fn is_registered(&self) -> bool {
		self.active
			.lock()
			.await
			.as_ref()
			.is_some_and(|task| !task.handle.is_finished())
	}

	/// Re-install a persisted registration whose `start_on_boot` is set.
	pub async fn restore(&self) -> Result<Option<Registration>, SchedulerError> {
		match self.load().await? {
			Some(options) if options.start_on_boot => {
				info!("Restoring persisted background sync registration");
				Ok(Some(self.register(options).await?))
			}
			Some(_) => {
				info!("Persisted background sync does not start on boot");
				Ok(None)
			}
			None => Ok(None),
		}
	}

	/// Start-up entry point: a persisted registration wins, `defaults` only apply when nothing
	/// was persisted. Returns `None` when the persisted registration does not start on boot.
	pub async fn resume_or_register(
		&self,
		defaults: TaskOptions,
	) -> Result<Option<Registration>, SchedulerError> {
		if self.load().await?.is_some() {
			return self.restore().await;
		}
		Ok(Some(self.register(defaults).await?))
	}

	/// Stop the loop because the process is exiting.
	///
	/// The persisted registration survives unless it was made with `stop_on_terminate`.
	pub async fn terminate(&self) -> Result<(), SchedulerError> {
		let Some(task) = self.active.lock().await.take() else {
			return Ok(());
		};

		let stop_on_terminate = task.options.stop_on_terminate;
		stop(task).await;

		if stop_on_terminate {
			self.store
				.remove(&registration_key(BACKGROUND_SYNC_TASK))
				.await?;
			info!("Background sync stopped and unregistered on terminate");
		} else {
			info!("Background sync stopped; registration kept for next start");
		}
		Ok(())
	}

	/// Stop the loop and forget the registration.
	pub async fn unregister(&self) -> Result<(), SchedulerError> {
		if let Some(task) = self.active.lock().await.take() {
			stop(task).await;
		}
		self.store
			.remove(&registration_key(BACKGROUND_SYNC_TASK))
			.await?;
		info!("Background sync unregistered");
		Ok(())
	}

	/// The persisted registration, if any
	pub async fn load(&self) -> Result<Option<TaskOptions>, SchedulerError> {
		match self
			.store
			.get(&registration_key(BACKGROUND_SYNC_TASK))
			.await?
		{
			Some(value) => Ok(Some(serde_json::from_str(&value)?)),
			None => Ok(None),
		}
	}

	async fn persist(&self, options: &TaskOptions) -> Result<(), SchedulerError> {
		let value = serde_json::to_string(options)?;
		self.store
			.set(&registration_key(BACKGROUND_SYNC_TASK), &value)
			.await?;
		Ok(())
	}
}

async fn stop(task: ActiveTask) {
	// The loop only observes shutdown between runs, so an in-flight run completes first
	let _ = task.shutdown.send(true);
	if let Err(e) = task.handle.await {
		warn!("Background sync loop ended abnormally: {}", e);
	}
}

async fn periodic_loop(
	task: Arc<dyn SyncTask>,
	minimum_interval: Duration,
	max_backoff_interval: Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut backoff = ExponentialBackoffBuilder::new()
		.with_initial_interval(minimum_interval.saturating_mul(2))
		.with_multiplier(2.0)
		.with_randomization_factor(0.0)
		.with_max_interval(max_backoff_interval.max(minimum_interval))
		.with_max_elapsed_time(None)
		.build();
	let mut delay = minimum_interval;

	loop {
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown.changed() => break,
		}

		let report = task.run().await;

		delay = if report.is_stalled() {
			let delay = backoff
				.next_backoff()
				.unwrap_or(max_backoff_interval.max(minimum_interval));
			info!("Sync made no progress, next attempt in {:?}", delay);
			delay
		} else {
			backoff.reset();
			minimum_interval
		};
	}

	debug!("Background sync loop stopped");
}

mod duration_millis {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(deserializer)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryStore;
	use crate::sync::{SyncError, SyncStats};
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Counts runs and checks they never overlap
	#[derive(Default)]
	struct CountingTask {
		runs: AtomicUsize,
		active: AtomicUsize,
		max_active: AtomicUsize,
		fail: bool,
	}

	#[async_trait::async_trait]
	impl SyncTask for CountingTask {
		async fn run(&self) -> SyncReport {
			let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_active.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(5)).await;
			self.active.fetch_sub(1, Ordering::SeqCst);
			self.runs.fetch_add(1, Ordering::SeqCst);

			if self.fail {
				SyncReport::aborted(SyncStats::default(), SyncError::AuthenticationMissing)
			} else {
				SyncReport::completed(SyncStats::default())
			}
		}
	}

	fn options(interval_ms: u64) -> TaskOptions {
		TaskOptions {
			minimum_interval: Duration::from_millis(interval_ms),
			..TaskOptions::default()
		}
	}

	#[tokio::test]
	async fn register_is_idempotent_and_persisted() {
		let store = Arc::new(MemoryStore::new());
		let task = Arc::new(CountingTask::default());
		let scheduler = BackgroundScheduler::new(store.clone(), task, Duration::from_secs(1));

		assert_eq!(
			scheduler.register(options(10_000)).await.unwrap(),
			Registration::Registered
		);
		assert_eq!(
			scheduler.register(options(10_000)).await.unwrap(),
			Registration::AlreadyRegistered
		);
		assert!(scheduler.is_registered().await);

		let stored = store
			.get(&registration_key(BACKGROUND_SYNC_TASK))
			.await
			.unwrap()
			.unwrap();
		let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
		assert_eq!(value["minimumIntervalMs"], 10_000);
		assert_eq!(value["stopOnTerminate"], false);
		assert_eq!(value["startOnBoot"], true);

		scheduler.unregister().await.unwrap();
		assert!(!scheduler.is_registered().await);
		assert!(scheduler.load().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn periodic_runs_never_overlap() {
		let store = Arc::new(MemoryStore::new());
		let task = Arc::new(CountingTask::default());
		let scheduler =
			BackgroundScheduler::new(store, task.clone(), Duration::from_millis(100));

		scheduler.register(options(2)).await.unwrap();
		tokio::time::sleep(Duration::from_millis(120)).await;
		scheduler.terminate().await.unwrap();

		assert!(task.runs.load(Ordering::SeqCst) >= 2);
		assert_eq!(task.max_active.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn failing_runs_keep_the_loop_registered() {
		let store = Arc::new(MemoryStore::new());
		let task = Arc::new(CountingTask {
			fail: true,
			..CountingTask::default()
		});
		let scheduler =
			BackgroundScheduler::new(store, task.clone(), Duration::from_millis(20));

		scheduler.register(options(2)).await.unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert!(task.runs.load(Ordering::SeqCst) >= 2);
		assert!(scheduler.is_registered().await);
		scheduler.unregister().await.unwrap();
	}

	#[tokio::test]
	async fn terminate_keeps_registration_for_next_start() {
		let store = Arc::new(MemoryStore::new());
		let task = Arc::new(CountingTask::default());

		let scheduler = BackgroundScheduler::new(store.clone(), task.clone(), Duration::from_secs(1));
		scheduler.register(options(10_000)).await.unwrap();
		scheduler.terminate().await.unwrap();
		assert!(!scheduler.is_registered().await);

		// A fresh process sharing the same store
		let restarted = BackgroundScheduler::new(store, task, Duration::from_secs(1));
		assert_eq!(
			restarted.restore().await.unwrap(),
			Some(Registration::Registered)
		);
		assert!(restarted.is_registered().await);
		restarted.unregister().await.unwrap();
	}

	#[tokio::test]
	async fn stop_on_terminate_drops_registration() {
		let store = Arc::new(MemoryStore::new());
		let task = Arc::new(CountingTask::default());
		let scheduler = BackgroundScheduler::new(store, task, Duration::from_secs(1));

		scheduler
			.register(TaskOptions {
				stop_on_terminate: true,
				..options(10_000)
			})
			.await
			.unwrap();
		scheduler.terminate().await.unwrap();

		assert!(scheduler.load().await.unwrap().is_none());
		assert_eq!(scheduler.restore().await.unwrap(), None);
	}

	#[tokio::test]
	async fn startup_keeps_a_persisted_opt_out() {
		let store = Arc::new(MemoryStore::new());
		let opted_out = serde_json::to_string(&TaskOptions {
			start_on_boot: false,
			..options(10_000)
		})
		.unwrap();
		store
			.set(&registration_key(BACKGROUND_SYNC_TASK), &opted_out)
			.await
			.unwrap();

		let scheduler = BackgroundScheduler::new(
			store.clone(),
			Arc::new(CountingTask::default()),
			Duration::from_secs(1),
		);
		assert_eq!(
			scheduler.resume_or_register(options(5_000)).await.unwrap(),
			None
		);
		assert!(!scheduler.is_registered().await);
		assert_eq!(
			store.get(&registration_key(BACKGROUND_SYNC_TASK)).await.unwrap(),
			Some(opted_out)
		);
	}

	#[tokio::test]
	async fn startup_registers_defaults_when_nothing_persisted() {
		let store = Arc::new(MemoryStore::new());
		let scheduler = BackgroundScheduler::new(
			store,
			Arc::new(CountingTask::default()),
			Duration::from_secs(1),
		);

		assert_eq!(
			scheduler.resume_or_register(options(5_000)).await.unwrap(),
			Some(Registration::Registered)
		);
		assert_eq!(scheduler.load().await.unwrap(), Some(options(5_000)));
		scheduler.unregister().await.unwrap();
	}

	#[tokio::test]
	async fn restore_respects_start_on_boot() {
		let store = Arc::new(MemoryStore::new());
		let value = serde_json::to_string(&TaskOptions {
			start_on_boot: false,
			..options(10_000)
		})
		.unwrap();
		store
			.set(&registration_key(BACKGROUND_SYNC_TASK), &value)
			.await
			.unwrap();

		let scheduler = BackgroundScheduler::new(
			store,
			Arc::new(CountingTask::default()),
			Duration::from_secs(1),
		);
		assert_eq!(scheduler.restore().await.unwrap(), None);
		assert!(!scheduler.is_registered().await);
	}
}
