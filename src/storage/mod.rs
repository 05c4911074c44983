//! Local key-value persistence.
//!
//! Every durable byte the client owns goes through a [`KeyValueStore`]. Records, the pending
//! queue, the session token and the background task registration are all plain string values
//! under well-known keys, so the store itself knows nothing about the domain.

/// Store trait and its file-backed and in-memory implementations
mod store;
/// Storage error types
mod types;

pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::*;
