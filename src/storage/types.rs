/// Errors raised by a key-value store backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Store file {path} is unreadable: {source}")]
	UnreadableStore {
		path: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),
}
