use super::StorageError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const STORE_FILENAME: &str = "store.json";

/// Durable mapping from string keys to string values.
///
/// This is the only persistence primitive the sync subsystem relies on. Implementations must make
/// a completed `set`/`remove` survive a process restart; they are not required to make sequences
/// of calls atomic.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

	async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

	/// Remove a key. Removing a key that does not exist is not an error.
	async fn remove(&self, key: &str) -> Result<(), StorageError>;

	/// All keys currently present, in ascending order.
	async fn keys(&self) -> Result<Vec<String>, StorageError>;

	/// Fetch several keys at once, preserving the order of `keys`.
	async fn multi_get(
		&self,
		keys: &[String],
	) -> Result<Vec<(String, Option<String>)>, StorageError> {
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			values.push((key.clone(), self.get(key).await?));
		}
		Ok(values)
	}

	/// Remove every key.
	async fn clear(&self) -> Result<(), StorageError>;
}

/// File-backed store.
///
/// The whole map is cached in memory and persisted as a single JSON document. Each write lands in
/// a temporary file first and is then renamed over the previous document, so a crash never leaves
/// a half-written store behind.
pub struct FileStore {
	path: PathBuf,
	entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
	/// Open (or create) the store inside `data_dir`.
	pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
		let data_dir = data_dir.as_ref();
		tokio::fs::create_dir_all(data_dir).await?;
		let path = data_dir.join(STORE_FILENAME);

		let entries = match tokio::fs::read_to_string(&path).await {
			Ok(content) if content.trim().is_empty() => BTreeMap::new(),
			Ok(content) => serde_json::from_str::<BTreeMap<String, String>>(&content).map_err(
				|source| StorageError::UnreadableStore {
					path: path.display().to_string(),
					source,
				},
			)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(e) => return Err(e.into()),
		};

		info!("Opened store {:?} with {} keys", path, entries.len());
		Ok(Self {
			path,
			entries: Mutex::new(entries),
		})
	}

	/// Location of the backing JSON document.
	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
		let content = serde_json::to_string_pretty(entries)?;
		let tmp_path = self.path.with_extension("json.tmp");

		tokio::fs::write(&tmp_path, content).await?;
		tokio::fs::rename(&tmp_path, &self.path).await?;

		debug!("Persisted {} keys to {:?}", entries.len(), self.path);
		Ok(())
	}
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let mut entries = self.entries.lock().await;
		let previous = entries.insert(key.to_string(), value.to_string());
		if let Err(e) = self.persist(&entries).await {
			// Keep the cache in line with what is on disk
			match previous {
				Some(previous) => entries.insert(key.to_string(), previous),
				None => entries.remove(key),
			};
			return Err(e);
		}
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StorageError> {
		let mut entries = self.entries.lock().await;
		let Some(previous) = entries.remove(key) else {
			return Ok(());
		};
		if let Err(e) = self.persist(&entries).await {
			entries.insert(key.to_string(), previous);
			return Err(e);
		}
		Ok(())
	}

	async fn keys(&self) -> Result<Vec<String>, StorageError> {
		Ok(self.entries.lock().await.keys().cloned().collect())
	}

	async fn clear(&self) -> Result<(), StorageError> {
		let mut entries = self.entries.lock().await;
		let previous = std::mem::take(&mut *entries);
		if let Err(e) = self.persist(&entries).await {
			*entries = previous;
			return Err(e);
		}
		Ok(())
	}
}

/// In-process store, mostly useful for tests and for embedding without a data directory.
#[derive(Default)]
pub struct MemoryStore {
	entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Copy of every key and value currently stored.
	pub async fn snapshot(&self) -> BTreeMap<String, String> {
		self.entries.lock().await.clone()
	}
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.entries
			.lock()
			.await
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StorageError> {
		self.entries.lock().await.remove(key);
		Ok(())
	}

	async fn keys(&self) -> Result<Vec<String>, StorageError> {
		Ok(self.entries.lock().await.keys().cloned().collect())
	}

	async fn clear(&self) -> Result<(), StorageError> {
		self.entries.lock().await.clear();
		Ok(())
	}
}
