//! Runtime configuration.
//!
//! Every setting has a default and can be overridden through a `POINTING_*` environment variable.

use crate::remote::PayloadFormat;
use crate::scheduler::{DEFAULT_MAX_BACKOFF_INTERVAL, TaskOptions};
use crate::sync::SyncConfig;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_BASE_URL: &str = "POINTING_BASE_URL";
pub const ENV_DATA_DIR: &str = "POINTING_DATA_DIR";
pub const ENV_BATCH_SIZE: &str = "POINTING_BATCH_SIZE";
pub const ENV_REQUEST_TIMEOUT: &str = "POINTING_REQUEST_TIMEOUT_SECS";
pub const ENV_PROBE_TIMEOUT: &str = "POINTING_PROBE_TIMEOUT_SECS";
pub const ENV_SYNC_INTERVAL: &str = "POINTING_SYNC_INTERVAL_SECS";
pub const ENV_MAX_BACKOFF: &str = "POINTING_MAX_BACKOFF_SECS";
pub const ENV_PAYLOAD_FORMAT: &str = "POINTING_PAYLOAD_FORMAT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid value '{value}' for {key}: {reason}")]
	InvalidValue {
		key: &'static str,
		value: String,
		reason: String,
	},
}

/// Configuration of the whole client
#[derive(Debug, Clone)]
pub struct AppConfig {
	/// Server root; submissions go to `{base_url}/api/pointing`
	pub base_url: String,
	/// Directory holding the key-value store
	pub data_dir: PathBuf,
	/// Bound on the connectivity probe
	pub probe_timeout: Duration,
	pub payload_format: PayloadFormat,
	pub sync: SyncConfig,
	/// Periodic registration options
	pub task: TaskOptions,
	/// Ceiling for the delay between unproductive periodic runs
	pub max_backoff_interval: Duration,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			base_url: "http://localhost:8000".to_string(),
			data_dir: PathBuf::from("./data"),
			probe_timeout: Duration::from_secs(5),
			payload_format: PayloadFormat::default(),
			sync: SyncConfig::default(),
			task: TaskOptions::default(),
			max_backoff_interval: DEFAULT_MAX_BACKOFF_INTERVAL,
		}
	}
}

impl AppConfig {
	/// Defaults overridden by the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Defaults overridden by whatever `lookup` returns for each variable.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(base_url) = lookup(ENV_BASE_URL) {
			config.base_url = base_url.trim().to_string();
		}
		if let Some(data_dir) = lookup(ENV_DATA_DIR) {
			config.data_dir = PathBuf::from(data_dir);
		}
		if let Some(value) = lookup(ENV_BATCH_SIZE) {
			let batch_size: usize = parse(ENV_BATCH_SIZE, &value)?;
			if batch_size == 0 {
				return Err(ConfigError::InvalidValue {
					key: ENV_BATCH_SIZE,
					value,
					reason: "must be at least 1".to_string(),
				});
			}
			config.sync.batch_size = batch_size;
		}
		if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
			config.sync.request_timeout = seconds(ENV_REQUEST_TIMEOUT, &value)?;
		}
		if let Some(value) = lookup(ENV_PROBE_TIMEOUT) {
			config.probe_timeout = seconds(ENV_PROBE_TIMEOUT, &value)?;
		}
		if let Some(value) = lookup(ENV_SYNC_INTERVAL) {
			config.task.minimum_interval = seconds(ENV_SYNC_INTERVAL, &value)?;
		}
		if let Some(value) = lookup(ENV_MAX_BACKOFF) {
			config.max_backoff_interval = seconds(ENV_MAX_BACKOFF, &value)?;
		}
		if let Some(value) = lookup(ENV_PAYLOAD_FORMAT) {
			config.payload_format = parse(ENV_PAYLOAD_FORMAT, &value)?;
		}

		Ok(config)
	}
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse::<T>()
		.map_err(|e| ConfigError::InvalidValue {
			key,
			value: value.to_string(),
			reason: e.to_string(),
		})
}

/// Positive whole seconds
fn seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
	let secs: u64 = parse(key, value)?;
	if secs == 0 {
		return Err(ConfigError::InvalidValue {
			key,
			value: value.to_string(),
			reason: "must be greater than zero".to_string(),
		});
	}
	Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |key| map.get(key).cloned()
	}

	#[test]
	fn defaults_without_environment() {
		let config = AppConfig::from_lookup(|_| None).unwrap();
		assert_eq!(config.sync.batch_size, 10);
		assert_eq!(config.sync.request_timeout, Duration::from_secs(30));
		assert_eq!(config.task.minimum_interval, Duration::from_secs(60));
		assert!(!config.task.stop_on_terminate);
		assert!(config.task.start_on_boot);
		assert_eq!(config.payload_format, PayloadFormat::Multipart);
	}

	#[test]
	fn environment_overrides_defaults() {
		let config = AppConfig::from_lookup(lookup(&[
			(ENV_BASE_URL, " https://field.example.com "),
			(ENV_BATCH_SIZE, "25"),
			(ENV_SYNC_INTERVAL, "900"),
			(ENV_PAYLOAD_FORMAT, "JSON"),
		]))
		.unwrap();

		assert_eq!(config.base_url, "https://field.example.com");
		assert_eq!(config.sync.batch_size, 25);
		assert_eq!(config.task.minimum_interval, Duration::from_secs(900));
		assert_eq!(config.payload_format, PayloadFormat::Json);
	}

	#[test]
	fn rejects_invalid_values() {
		for (key, value) in [
			(ENV_BATCH_SIZE, "0"),
			(ENV_BATCH_SIZE, "ten"),
			(ENV_REQUEST_TIMEOUT, "0"),
			(ENV_PAYLOAD_FORMAT, "xml"),
		] {
			let result = AppConfig::from_lookup(lookup(&[(key, value)]));
			assert!(
				matches!(result, Err(ConfigError::InvalidValue { key: k, .. }) if k == key),
				"{} = {} should be rejected",
				key,
				value
			);
		}
	}
}
