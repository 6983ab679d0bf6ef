//! Per-search caches used to check whether a source entry has changed.
use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::entry::SourceEntry;

/// Outcome of observing one source entry within one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
	/// No entry with this DN was cached before.
	New,
	/// A cached entry existed but its content differs.
	Changed,
	/// The cached entry has identical content.
	Unchanged,
}

/// Result caches keyed by search id, each mapping DN to the last-seen
/// snapshot of that entry.
#[derive(Debug, Default)]
pub struct ResultCache {
	/// Search id to its DN-keyed result map.
	inner: RwLock<HashMap<String, HashMap<String, SourceEntry>>>,
}

impl ResultCache {
	/// Install an empty result map for a search id.
	pub async fn insert_search(&self, id: &str) {
		self.inner.write().await.insert(id.to_owned(), HashMap::new());
	}

	/// Drop the result map of a search id.
	pub async fn remove_search(&self, id: &str) {
		self.inner.write().await.remove(id);
	}

	/// Record an observation of `entry`, comparing content by deep structural
	/// equality. Returns `None` when the search id has no result map (the
	/// search was deleted while its last scan was still in flight).
	pub async fn observe(&self, id: &str, entry: SourceEntry) -> Option<Observation> {
		let mut inner = self.inner.write().await;
		let results = inner.get_mut(id)?;
		let observation = match results.get(&entry.dn) {
			None => Observation::New,
			Some(existing) if existing.content != entry.content => Observation::Changed,
			Some(_) => Observation::Unchanged,
		};
		if observation != Observation::Unchanged {
			results.insert(entry.dn.clone(), entry);
		}
		Some(observation)
	}

	/// Empty every search's result map, keeping the search ids registered.
	/// The next scan of each search re-emits everything as new.
	pub async fn reset_all(&self) {
		for results in self.inner.write().await.values_mut() {
			results.clear();
		}
	}

	/// The cached entries of one search, or `None` for an unknown id.
	pub async fn entries(&self, id: &str) -> Option<Vec<SourceEntry>> {
		self.inner.read().await.get(id).map(|results| results.values().cloned().collect())
	}
}
