//! Named scalar bindings published by hooks and substituted into later
//! transformed entries and dependency declarations.
use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::debug;

/// A consistent copy of the binding state, taken once per resolution pass.
#[derive(Debug, Clone, Default)]
pub struct BindingSnapshot {
	/// Names with a known value.
	pub values: HashMap<String, String>,
	/// Names positively asserted to have no value. Disjoint from `values`.
	pub nulls: HashSet<String>,
}

/// Holds the name-to-value and name-to-null binding maps.
#[derive(Debug, Default)]
pub struct BindingStore {
	/// The authoritative binding state; readers copy it out.
	inner: RwLock<BindingSnapshot>,
}

impl BindingStore {
	/// Copy the current binding state so a resolution pass sees a consistent
	/// view even under concurrent updates.
	pub async fn snapshot(&self) -> BindingSnapshot {
		self.inner.read().await.clone()
	}

	/// Apply an update in one critical section: a value sets the binding and
	/// clears a null of the same name, a null marks the name and clears its
	/// value. Returns whether anything was applied; the caller reprocesses
	/// pending entries when it was.
	pub async fn apply(&self, updates: HashMap<String, Option<String>>) -> bool {
		if updates.is_empty() {
			return false;
		}
		let update_count = updates.len();
		let mut inner = self.inner.write().await;
		let prev_count = inner.values.len();
		let prev_null_count = inner.nulls.len();
		let mut null_count = 0;
		for (name, value) in updates {
			match value {
				Some(value) => {
					inner.nulls.remove(&name);
					inner.values.insert(name, value);
				}
				None => {
					inner.values.remove(&name);
					inner.nulls.insert(name);
					null_count += 1;
				}
			}
		}
		debug!(
			new_count = update_count,
			null_count,
			total_count = inner.values.len(),
			total_null_count = inner.nulls.len(),
			prev_count,
			prev_null_count,
			"Bindings updated"
		);
		true
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::BindingStore;

	#[tokio::test]
	async fn value_and_null_are_disjoint() {
		let store = BindingStore::default();
		assert!(
			store
				.apply(HashMap::from([("gid".to_owned(), Some("100".to_owned()))]))
				.await
		);
		let snapshot = store.snapshot().await;
		assert_eq!(snapshot.values.get("gid").map(String::as_str), Some("100"));
		assert!(!snapshot.nulls.contains("gid"));

		assert!(store.apply(HashMap::from([("gid".to_owned(), None)])).await);
		let snapshot = store.snapshot().await;
		assert!(!snapshot.values.contains_key("gid"));
		assert!(snapshot.nulls.contains("gid"));

		assert!(
			store
				.apply(HashMap::from([("gid".to_owned(), Some("200".to_owned()))]))
				.await
		);
		let snapshot = store.snapshot().await;
		assert_eq!(snapshot.values.get("gid").map(String::as_str), Some("200"));
		assert!(!snapshot.nulls.contains("gid"));
	}

	#[tokio::test]
	async fn empty_update_is_a_no_op() {
		let store = BindingStore::default();
		assert!(!store.apply(HashMap::new()).await);
		assert!(store.snapshot().await.values.is_empty());
	}

	#[tokio::test]
	async fn snapshots_are_isolated() {
		let store = BindingStore::default();
		assert!(
			store
				.apply(HashMap::from([("a".to_owned(), Some("1".to_owned()))]))
				.await
		);
		let before = store.snapshot().await;
		assert!(store.apply(HashMap::from([("a".to_owned(), None)])).await);
		assert_eq!(before.values.get("a").map(String::as_str), Some("1"));
	}
}
