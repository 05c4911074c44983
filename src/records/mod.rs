//! Record persistence: the repository, the pending queue and the stored session.
//!
//! The repository exclusively owns the `item_<objectCode>` entries and the queue exclusively owns
//! `sync_queue`. Both sit on top of the same [`KeyValueStore`](crate::storage::KeyValueStore) and
//! are kept consistent by the sync engine, which treats either one as a valid source of work.

/// Ordered set of object codes awaiting submission
mod queue;
/// Record storage under `item_<objectCode>` keys
mod repository;
/// Stored bearer token and username
mod session;
/// Record type, builder and store keys
mod types;

pub use queue::{PendingQueue, QueueError};
pub use repository::{RecordRepository, RepositoryError, UnsyncedScan};
pub use session::Session;
pub use types::*;
