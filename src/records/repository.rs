use super::types::{RECORD_KEY_PREFIX, Record, record_key};
use crate::storage::{KeyValueStore, StorageError};

use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised by the record repository
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
	#[error("Storage error: {0}")]
	StorageError(#[from] StorageError),

	#[error("Stored record {object_code} cannot be decoded: {source}")]
	Corrupt {
		object_code: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("Record {object_code} cannot change its {field} once created")]
	ImmutableField {
		object_code: String,
		field: &'static str,
	},

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),
}

/// Result of scanning the store for records that still need syncing
#[derive(Debug, Default)]
pub struct UnsyncedScan {
	/// Decodable records whose `synced` flag is false
	pub records: Vec<Record>,
	/// Object codes whose stored value could not be decoded
	pub corrupt: Vec<String>,
}

/// Owns the stored representation of records, one entry per object code.
///
/// Clones share one write lock, so a save and a sync commit on the same repository never
/// interleave their read and write.
#[derive(Clone)]
pub struct RecordRepository {
	store: Arc<dyn KeyValueStore>,
	write_lock: Arc<Mutex<()>>,
}

impl RecordRepository {
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self {
			store,
			write_lock: Arc::new(Mutex::new(())),
		}
	}

	/// Upsert a record under its object code.
	///
	/// The stored value is replaced wholesale and the `synced` flag is taken verbatim from
	/// `record`. Creation fields of an existing record and an already-set end date cannot change.
	pub async fn save(&self, record: &Record) -> Result<(), RepositoryError> {
		let _guard = self.write_lock.lock().await;

		match self.get(&record.object_code).await {
			Ok(Some(existing)) => check_append_only(&existing, record)?,
			Ok(None) => {}
			// An unreadable previous value is simply overwritten
			Err(RepositoryError::Corrupt { object_code, .. }) => {
				warn!("Overwriting undecodable record {}", object_code);
			}
			Err(e) => return Err(e),
		}

		self.write(record).await?;

		debug!(
			"Saved record {} (synced: {})",
			record.object_code, record.synced
		);
		Ok(())
	}

	/// Load one record. Undecodable data is reported as [`RepositoryError::Corrupt`].
	pub async fn get(&self, object_code: &str) -> Result<Option<Record>, RepositoryError> {
		let Some(value) = self.store.get(&record_key(object_code)).await? else {
			return Ok(None);
		};

		serde_json::from_str(&value)
			.map(Some)
			.map_err(|source| RepositoryError::Corrupt {
				object_code: object_code.to_string(),
				source,
			})
	}

	/// Mark a record as accepted by the remote endpoint. Absent records are ignored.
	pub async fn mark_synced(&self, object_code: &str) -> Result<(), RepositoryError> {
		let _guard = self.write_lock.lock().await;

		let Some(mut record) = self.get(object_code).await? else {
			debug!("Record {} no longer exists, nothing to mark", object_code);
			return Ok(());
		};
		if record.synced {
			return Ok(());
		}

		record.mark_synced();
		self.write(&record).await
	}

	/// Mark `submitted` as synced only if the stored record still holds that exact state.
	///
	/// Returns `false` when the record changed or disappeared after `submitted` was read; the
	/// stored value is then left untouched.
	pub async fn mark_synced_if_unchanged(
		&self,
		submitted: &Record,
	) -> Result<bool, RepositoryError> {
		let _guard = self.write_lock.lock().await;

		let Some(mut stored) = self.get(&submitted.object_code).await? else {
			return Ok(false);
		};
		if !stored.same_content(submitted) || stored.picture_synced != submitted.picture_synced {
			debug!(
				"Record {} changed during submission, leaving it pending",
				submitted.object_code
			);
			return Ok(false);
		}
		if stored.synced {
			return Ok(true);
		}

		stored.mark_synced();
		self.write(&stored).await?;
		Ok(true)
	}

	/// Delete a record.
	pub async fn remove(&self, object_code: &str) -> Result<(), RepositoryError> {
		let _guard = self.write_lock.lock().await;
		self.store.remove(&record_key(object_code)).await?;
		info!("Removed record {}", object_code);
		Ok(())
	}

	/// All records whose `synced` flag is false.
	pub async fn list_unsynced(&self) -> Result<Vec<Record>, RepositoryError> {
		Ok(self.scan_unsynced().await?.records)
	}

	/// Scan every record key, collecting unsynced records and undecodable entries.
	pub async fn scan_unsynced(&self) -> Result<UnsyncedScan, RepositoryError> {
		let mut scan = UnsyncedScan::default();

		for (object_code, decoded) in self.scan().await? {
			match decoded {
				Ok(record) if !record.synced => scan.records.push(record),
				Ok(_) => {}
				Err(e) => {
					warn!("Skipping undecodable record {}: {}", object_code, e);
					scan.corrupt.push(object_code);
				}
			}
		}

		Ok(scan)
	}

	/// All decodable records, most recent entry first.
	pub async fn list(&self) -> Result<Vec<Record>, RepositoryError> {
		let records = self
			.scan()
			.await?
			.into_iter()
			.filter_map(|(_, decoded)| decoded.ok())
			.unique_by(|record| record.object_code.clone())
			.sorted_by(|a, b| b.begin_date.cmp(&a.begin_date))
			.collect();
		Ok(records)
	}

	async fn write(&self, record: &Record) -> Result<(), RepositoryError> {
		let value = serde_json::to_string(record)?;
		self.store
			.set(&record_key(&record.object_code), &value)
			.await?;
		Ok(())
	}

	async fn scan(
		&self,
	) -> Result<Vec<(String, Result<Record, serde_json::Error>)>, RepositoryError> {
		let keys: Vec<String> = self
			.store
			.keys()
			.await?
			.into_iter()
			.filter(|key| key.starts_with(RECORD_KEY_PREFIX))
			.collect();

		let entries = self
			.store
			.multi_get(&keys)
			.await?
			.into_iter()
			.filter_map(|(key, value)| {
				let object_code = key.strip_prefix(RECORD_KEY_PREFIX)?.to_string();
				let value = value?;
				Some((object_code, serde_json::from_str::<Record>(&value)))
			})
			.collect();

		Ok(entries)
	}
}

fn check_append_only(existing: &Record, incoming: &Record) -> Result<(), RepositoryError> {
	let immutable = |field: &'static str| RepositoryError::ImmutableField {
		object_code: incoming.object_code.clone(),
		field,
	};

	if existing.begin_date != incoming.begin_date {
		return Err(immutable("beginDate"));
	}
	if existing.end_date.is_some() && existing.end_date != incoming.end_date {
		return Err(immutable("endDate"));
	}
	if !existing.creation_fields_match(incoming) {
		return Err(immutable("entry fields"));
	}
	Ok(())
}
