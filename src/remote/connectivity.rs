use super::types::{ClientError, NetworkState};

use reqwest::{Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Answers whether a sync attempt has any chance of reaching the server.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
	async fn network_state(&self) -> NetworkState;
}

/// Probe that sends a short `HEAD` request to the server root.
///
/// Any HTTP answer, whatever its status, proves the server is reachable. A transport failure or a
/// timeout reports the device as offline.
pub struct HttpConnectivityProbe {
	http_client: Client,
	target: Url,
}

impl HttpConnectivityProbe {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
		let target = Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl {
			url: base_url.to_string(),
			reason: e.to_string(),
		})?;
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			target,
		})
	}
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
	async fn network_state(&self) -> NetworkState {
		match self.http_client.head(self.target.clone()).send().await {
			Ok(response) => {
				debug!("Connectivity probe answered with {}", response.status());
				NetworkState::online()
			}
			Err(e) => {
				debug!("Connectivity probe failed: {}", e);
				NetworkState::offline()
			}
		}
	}
}

/// Probe with a fixed, switchable answer.
#[derive(Debug)]
pub struct StaticConnectivity {
	online: AtomicBool,
}

impl StaticConnectivity {
	pub fn new(online: bool) -> Self {
		Self {
			online: AtomicBool::new(online),
		}
	}

	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl ConnectivityProbe for StaticConnectivity {
	async fn network_state(&self) -> NetworkState {
		if self.online.load(Ordering::SeqCst) {
			NetworkState::online()
		} else {
			NetworkState::offline()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_reachability_still_allows_sync() {
		let state = NetworkState {
			is_connected: true,
			is_internet_reachable: None,
		};
		assert!(state.can_sync());
		assert!(!NetworkState::offline().can_sync());
		assert!(
			!NetworkState {
				is_connected: true,
				is_internet_reachable: Some(false),
			}
			.can_sync()
		);
	}

	#[tokio::test]
	async fn static_probe_can_be_switched() {
		let probe = StaticConnectivity::new(false);
		assert!(!probe.network_state().await.can_sync());
		probe.set_online(true);
		assert!(probe.network_state().await.can_sync());
	}

	#[tokio::test]
	async fn unreachable_server_reads_as_offline() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let probe =
			HttpConnectivityProbe::new(&format!("http://{}", addr), Duration::from_millis(500))
				.unwrap();
		assert_eq!(probe.network_state().await, NetworkState::offline());
	}
}
