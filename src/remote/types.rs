//! Types for the pointing endpoint and the connectivity probe

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a record is encoded in the submission body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
	/// One form field per attribute, the picture as a `photo.jpg` file part
	#[default]
	Multipart,
	/// A JSON document, the picture as its reference string
	Json,
}

impl std::str::FromStr for PayloadFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"multipart" => Ok(PayloadFormat::Multipart),
			"json" => Ok(PayloadFormat::Json),
			other => Err(format!("unknown payload format '{}'", other)),
		}
	}
}

/// Snapshot of the device's network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
	pub is_connected: bool,
	/// `None` when reachability could not be determined
	pub is_internet_reachable: Option<bool>,
}

impl NetworkState {
	pub fn online() -> Self {
		Self {
			is_connected: true,
			is_internet_reachable: Some(true),
		}
	}

	pub fn offline() -> Self {
		Self {
			is_connected: false,
			is_internet_reachable: Some(false),
		}
	}

	/// Connected, and not known to be cut off from the internet
	pub fn can_sync(&self) -> bool {
		self.is_connected && self.is_internet_reachable != Some(false)
	}
}

/// Why a single submission did not go through
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
	#[error("Endpoint rejected the submission with status {status}")]
	Rejected { status: u16 },

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("Submission timed out after {0:?}")]
	Timeout(Duration),

	#[error("Picture {path} could not be read: {source}")]
	PictureError {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

/// Errors raised while constructing the remote clients
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("Invalid base URL {url}: {reason}")]
	InvalidBaseUrl { url: String, reason: String },

	#[error("HTTP client error: {0}")]
	HttpError(#[from] reqwest::Error),
}
