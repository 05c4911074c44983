//! Offline durability and synchronization for field pointing records.
//!
//! Records of "enter"/"exit" events are written to a local key-value store, queued, and pushed to
//! the remote pointing endpoint whenever connectivity allows, either right after a save or from a
//! periodic background loop.

/// Runtime configuration
pub mod config;
/// Records, pending queue and session on top of the store
pub mod records;
/// Pointing endpoint client and connectivity probe
pub mod remote;
/// Periodic background loop and save trigger
pub mod scheduler;
/// Local key-value persistence
pub mod storage;
/// The sync engine
pub mod sync;
