use crate::records::{QueueError, Record, RecordError, RepositoryError};
use crate::sync::{SyncEngine, SyncReport};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Errors reported to the UI when a local save fails
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
	#[error("An item with object code {0} already exists")]
	AlreadyExists(String),

	#[error("Item {0} not found")]
	NotFound(String),

	#[error("Record error: {0}")]
	RecordError(#[from] RecordError),

	#[error("Repository error: {0}")]
	RepositoryError(#[from] RepositoryError),

	#[error("Queue error: {0}")]
	QueueError(#[from] QueueError),
}

/// Returned once the local write succeeded.
///
/// `sync` resolves to the report of the opportunistic run started right after the write. Callers
/// are free to drop it; the periodic loop picks up anything that run leaves behind.
pub struct SaveReceipt {
	pub object_code: String,
	pub sync: JoinHandle<SyncReport>,
}

/// Entry point used by the UI to persist records and nudge the engine.
#[derive(Clone)]
pub struct SyncTrigger {
	engine: Arc<SyncEngine>,
}

impl SyncTrigger {
	pub fn new(engine: Arc<SyncEngine>) -> Self {
		Self { engine }
	}

	/// Persist the entry event of a new object. Object codes are unique.
	pub async fn enter(&self, record: &Record) -> Result<SaveReceipt, TriggerError> {
		if self
			.engine
			.repository()
			.get(&record.object_code)
			.await?
			.is_some()
		{
			return Err(TriggerError::AlreadyExists(record.object_code.clone()));
		}
		self.save(record).await
	}

	/// Record the exit event of an existing object.
	pub async fn exit(
		&self,
		object_code: &str,
		end_date: DateTime<Utc>,
		picture: Option<String>,
	) -> Result<SaveReceipt, TriggerError> {
		let mut record = self
			.engine
			.repository()
			.get(object_code)
			.await?
			.ok_or_else(|| TriggerError::NotFound(object_code.to_string()))?;

		record.exit(end_date, picture)?;
		self.save(&record).await
	}

	/// Save a record, queue it unless it is already synced, and start a sync attempt.
	pub async fn save(&self, record: &Record) -> Result<SaveReceipt, TriggerError> {
		self.engine.repository().save(record).await?;
		if !record.synced {
			self.engine.queue().enqueue(&record.object_code).await?;
		}
		info!("Saved item {} for sync", record.object_code);

		let engine = self.engine.clone();
		let sync = tokio::spawn(async move { engine.run().await });

		Ok(SaveReceipt {
			object_code: record.object_code.clone(),
			sync,
		})
	}
}
