use super::types::{TOKEN_KEY, USERNAME_KEY};
use crate::storage::{KeyValueStore, StorageError};

use std::sync::Arc;
use tracing::info;

/// Credentials handed over by the login flow.
///
/// The token is opaque to this crate and only ever forwarded as a bearer credential. The username
/// is kept for display by the UI collaborator.
#[derive(Clone)]
pub struct Session {
	store: Arc<dyn KeyValueStore>,
}

impl Session {
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self { store }
	}

	/// The stored bearer token, if any. Blank tokens count as missing.
	pub async fn token(&self) -> Result<Option<String>, StorageError> {
		Ok(self
			.store
			.get(TOKEN_KEY)
			.await?
			.filter(|token| !token.trim().is_empty()))
	}

	pub async fn username(&self) -> Result<Option<String>, StorageError> {
		self.store.get(USERNAME_KEY).await
	}

	pub async fn sign_in(&self, token: &str, username: &str) -> Result<(), StorageError> {
		self.store.set(TOKEN_KEY, token).await?;
		self.store.set(USERNAME_KEY, username).await?;
		info!("Stored credentials for {}", username);
		Ok(())
	}

	/// Forget the credentials. Records and the queue are kept so they sync after the next login.
	pub async fn sign_out(&self) -> Result<(), StorageError> {
		self.store.remove(TOKEN_KEY).await?;
		self.store.remove(USERNAME_KEY).await?;
		info!("Cleared stored credentials");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryStore;

	#[tokio::test]
	async fn sign_in_and_out() {
		let store = Arc::new(MemoryStore::new());
		let session = Session::new(store.clone());
		assert_eq!(session.token().await.unwrap(), None);

		session.sign_in("tok-1", "field@example.com").await.unwrap();
		assert_eq!(session.token().await.unwrap().as_deref(), Some("tok-1"));
		assert_eq!(
			session.username().await.unwrap().as_deref(),
			Some("field@example.com")
		);

		store.set("item_A", "{}").await.unwrap();
		session.sign_out().await.unwrap();
		assert_eq!(session.token().await.unwrap(), None);
		assert!(store.get("item_A").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn blank_token_counts_as_missing() {
		let store = Arc::new(MemoryStore::new());
		store.set(TOKEN_KEY, "  ").await.unwrap();
		assert_eq!(Session::new(store).token().await.unwrap(), None);
	}
}
