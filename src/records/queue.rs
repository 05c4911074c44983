use super::types::SYNC_QUEUE_KEY;
use crate::storage::{KeyValueStore, StorageError};

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised by the pending queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("Storage error: {0}")]
	StorageError(#[from] StorageError),

	#[error("Stored sync queue cannot be decoded: {0}")]
	Corrupt(#[source] serde_json::Error),

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),
}

/// Ordered set of object codes awaiting submission.
///
/// The queue is the fast path for "needs sync"; the repository's unsynced scan backs it up. Each
/// code appears at most once and keeps the position of its first enqueue.
#[derive(Clone)]
pub struct PendingQueue {
	store: Arc<dyn KeyValueStore>,
	/// Serializes read-modify-write cycles issued from this process
	write_lock: Arc<Mutex<()>>,
}

impl PendingQueue {
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self {
			store,
			write_lock: Arc::new(Mutex::new(())),
		}
	}

	/// Add a code unless it is already queued.
	pub async fn enqueue(&self, object_code: &str) -> Result<(), QueueError> {
		let _guard = self.write_lock.lock().await;

		let mut queue = match self.load().await {
			Ok(queue) => queue,
			Err(QueueError::Corrupt(e)) => {
				warn!("Discarding undecodable sync queue: {}", e);
				Vec::new()
			}
			Err(e) => return Err(e),
		};

		if queue.iter().any(|code| code == object_code) {
			debug!("Item {} already in sync queue", object_code);
			return Ok(());
		}

		queue.push(object_code.to_string());
		self.persist(&queue).await?;
		info!("Added item {} to sync queue", object_code);
		Ok(())
	}

	/// Remove a code. Codes that are not queued are ignored.
	pub async fn dequeue(&self, object_code: &str) -> Result<(), QueueError> {
		let _guard = self.write_lock.lock().await;

		let mut queue = self.load().await?;
		let before = queue.len();
		queue.retain(|code| code != object_code);
		if queue.len() == before {
			return Ok(());
		}

		self.persist(&queue).await?;
		info!("Removed item {} from sync queue", object_code);
		Ok(())
	}

	/// The full queue in insertion order.
	pub async fn list(&self) -> Result<Vec<String>, QueueError> {
		self.load().await
	}

	pub async fn contains(&self, object_code: &str) -> Result<bool, QueueError> {
		Ok(self.load().await?.iter().any(|code| code == object_code))
	}

	async fn load(&self) -> Result<Vec<String>, QueueError> {
		match self.store.get(SYNC_QUEUE_KEY).await? {
			Some(value) => serde_json::from_str(&value).map_err(QueueError::Corrupt),
			None => Ok(Vec::new()),
		}
	}

	async fn persist(&self, queue: &[String]) -> Result<(), QueueError> {
		let value = serde_json::to_string(queue)?;
		self.store.set(SYNC_QUEUE_KEY, &value).await?;
		Ok(())
	}
}
