//! What makes the engine run: the periodic background loop and the save-and-sync trigger.
//!
//! The periodic loop is the backstop; most records are first attempted right after the UI saves
//! them through [`SyncTrigger`].

/// Periodic, persisted background registration
mod background;
/// Save entry point that enqueues and syncs opportunistically
mod trigger;

pub use background::{
	BACKGROUND_SYNC_TASK, BackgroundScheduler, DEFAULT_MAX_BACKOFF_INTERVAL,
	DEFAULT_MINIMUM_INTERVAL, Registration, SchedulerError, SyncTask, TaskOptions,
	registration_key,
};
pub use trigger::{SaveReceipt, SyncTrigger, TriggerError};
