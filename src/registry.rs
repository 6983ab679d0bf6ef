//! In-memory table of active searches and their scheduler tasks.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A durable description of one polling query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpec {
	/// LDAP filter expression.
	pub filter: String,
	/// Seconds between scans.
	pub refresh: u32,
	/// Base DN the subtree search starts at.
	pub base_dn: String,
	/// Run exactly one scan and never engage the hooks.
	pub oneshot: bool,
}

/// A registered search and the cancellation signal of its running task.
#[derive(Debug)]
struct RegisteredSearch {
	/// The search parameters.
	spec: SearchSpec,
	/// Cancels the running scheduler task.
	token: CancellationToken,
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
	/// A search with the requested id is already registered.
	#[error("Search with this id already exists")]
	Exists,
	/// No search with the requested id is registered.
	#[error("Search with this id does not exist")]
	Missing,
}

/// Indexed collection of the live search specifications.
#[derive(Debug, Default)]
pub struct Registry {
	/// Registered searches keyed by id.
	inner: RwLock<HashMap<String, RegisteredSearch>>,
}

impl Registry {
	/// Register a new search and hand back the fresh cancellation token its
	/// scheduler task should watch. Fails if the id is taken.
	pub async fn create(&self, id: &str, spec: SearchSpec) -> Result<CancellationToken, RegistryError> {
		let mut inner = self.inner.write().await;
		if inner.contains_key(id) {
			return Err(RegistryError::Exists);
		}
		let token = CancellationToken::new();
		inner.insert(id.to_owned(), RegisteredSearch { spec, token: token.clone() });
		Ok(token)
	}

	/// Replace an existing search, cancelling the prior task and handing back
	/// a fresh token for the new one. Fails if the id is unknown.
	pub async fn replace(
		&self,
		id: &str,
		spec: SearchSpec,
	) -> Result<CancellationToken, RegistryError> {
		let mut inner = self.inner.write().await;
		let registered = inner.get_mut(id).ok_or(RegistryError::Missing)?;
		registered.token.cancel();
		let token = CancellationToken::new();
		*registered = RegisteredSearch { spec, token: token.clone() };
		Ok(token)
	}

	/// Remove a search and cancel its task. Fails if the id is unknown.
	pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
		let mut inner = self.inner.write().await;
		let registered = inner.remove(id).ok_or(RegistryError::Missing)?;
		registered.token.cancel();
		Ok(())
	}

	/// The specification registered under `id`.
	pub async fn get(&self, id: &str) -> Option<SearchSpec> {
		self.inner.read().await.get(id).map(|registered| registered.spec.clone())
	}

	/// Whether a search with `id` is registered.
	pub async fn contains(&self, id: &str) -> bool {
		self.inner.read().await.contains_key(id)
	}

	/// All registered searches.
	pub async fn list(&self) -> Vec<(String, SearchSpec)> {
		self.inner
			.read()
			.await
			.iter()
			.map(|(id, registered)| (id.clone(), registered.spec.clone()))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::{Registry, RegistryError, SearchSpec};

	fn spec(filter: &str) -> SearchSpec {
		SearchSpec {
			filter: filter.to_owned(),
			refresh: 10,
			base_dn: "dc=example,dc=org".to_owned(),
			oneshot: false,
		}
	}

	#[tokio::test]
	async fn create_rejects_duplicate_ids() {
		let registry = Registry::default();
		registry.create("s1", spec("(cn=*)")).await.unwrap();
		assert_eq!(registry.create("s1", spec("(uid=*)")).await.unwrap_err(), RegistryError::Exists);
		assert_eq!(registry.get("s1").await.unwrap().filter, "(cn=*)");
	}

	#[tokio::test]
	async fn replace_cancels_the_prior_task() {
		let registry = Registry::default();
		let old_token = registry.create("s1", spec("(cn=*)")).await.unwrap();
		let new_token = registry.replace("s1", spec("(uid=*)")).await.unwrap();
		assert!(old_token.is_cancelled());
		assert!(!new_token.is_cancelled());
		assert_eq!(registry.get("s1").await.unwrap().filter, "(uid=*)");
	}

	#[tokio::test]
	async fn replace_and_delete_require_a_known_id() {
		let registry = Registry::default();
		assert_eq!(
			registry.replace("nope", spec("(cn=*)")).await.unwrap_err(),
			RegistryError::Missing
		);
		assert_eq!(registry.delete("nope").await.unwrap_err(), RegistryError::Missing);
	}

	#[tokio::test]
	async fn delete_cancels_and_unregisters() {
		let registry = Registry::default();
		let token = registry.create("s1", spec("(cn=*)")).await.unwrap();
		registry.delete("s1").await.unwrap();
		assert!(token.is_cancelled());
		assert!(!registry.contains("s1").await);
		assert!(registry.list().await.is_empty());
	}
}
