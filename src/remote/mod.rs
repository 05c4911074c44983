//! Remote side of the sync: the pointing endpoint and the connectivity probe.
//!
//! The server is assumed to expose a single idempotent `POST /api/pointing` endpoint guarded by a
//! bearer token. The sync engine only talks to it through [`RecordSubmitter`] and
//! [`ConnectivityProbe`], so tests and embedders can swap in their own implementations.

/// HTTP client for the pointing endpoint
mod client;
/// Network reachability probing
mod connectivity;
/// Remote types and errors
mod types;

pub use client::{POINTING_PATH, PointingClient, RecordSubmitter};
pub use connectivity::{ConnectivityProbe, HttpConnectivityProbe, StaticConnectivity};
pub use types::*;
