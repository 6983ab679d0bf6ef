//! Defers target writes until every declared dependency DN has been written
//! and every referenced binding is resolvable.
//!
//! A transformed entry is written only after (a) every DN in its dependency
//! list has itself been written to the target and (b) every `$name` token in
//! its DN, attribute values or dependency strings refers to a known binding
//! or one explicitly marked null. Until then the entry is held in memory and
//! retried whenever a dependency is synced or the bindings change. Entries
//! whose preconditions never arrive stay pending forever; dangling
//! dependencies are observable in the debug logs but are not errors.
use std::{
	collections::{BTreeSet, HashMap, HashSet, VecDeque},
	sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
	bindings::BindingStore,
	entry::{normalize_dn, TransformedEntry},
	template::{collect_missing_bindings, resolve_dependencies, resolve_entry},
	writer::{merge_content, EntryWriter},
};

/// An entry held back until its dependencies are synced and its bindings
/// resolve.
#[derive(Debug)]
struct PendingEntry {
	/// The entry as received, with templates unresolved.
	entry: TransformedEntry,
	/// The original dependency declarations, possibly templated.
	raw_deps: Vec<String>,
	/// Normalized dependency DNs not yet marked synced.
	missing: HashSet<String>,
}

/// Dependency bookkeeping guarded by one mutex. `reverse` maps a normalized
/// dependency DN to the normalized DNs of the pending entries waiting on it.
#[derive(Debug, Default)]
struct ResolverState {
	/// Normalized DNs confirmed written to the target.
	synced: HashSet<String>,
	/// Held-back entries keyed by their normalized DN.
	pending: HashMap<String, PendingEntry>,
	/// Normalized dependency DN to the parents waiting on it.
	reverse: HashMap<String, HashSet<String>>,
}

/// Orders target writes according to declared dependencies and published
/// bindings.
pub struct Resolver {
	/// Dependency bookkeeping.
	state: Mutex<ResolverState>,
	/// Source of template snapshots.
	bindings: Arc<BindingStore>,
	/// Sink for released entries.
	writer: Arc<dyn EntryWriter>,
}

impl Resolver {
	/// Create a resolver writing released entries through `writer`.
	#[must_use]
	pub fn new(bindings: Arc<BindingStore>, writer: Arc<dyn EntryWriter>) -> Self {
		Resolver { state: Mutex::new(ResolverState::default()), bindings, writer }
	}

	/// Process one transformed entry with its declared dependencies: write it
	/// immediately when every precondition holds, otherwise hold it pending.
	pub async fn handle_entry(&self, entry: TransformedEntry, deps: &[String]) {
		if let Some(written) = self.admit(entry, deps.to_vec()).await {
			self.release_from(written).await;
		}
	}

	/// Record a DN as present in the target and release any pending entries
	/// whose last missing dependency it was.
	pub async fn mark_synced(&self, dn: &str) {
		self.release_from(dn.to_owned()).await;
	}

	/// Drain the entire pending state and re-admit every entry with its
	/// original dependency declarations. Invoked when the bindings change,
	/// since new bindings may change an entry's dependency shape.
	pub async fn reprocess_pending(&self) {
		let drained: Vec<PendingEntry> = {
			let mut state = self.state.lock().await;
			// Every reverse edge belongs to some pending entry, so draining
			// the pending map empties the reverse index with it.
			state.reverse.clear();
			std::mem::take(&mut state.pending).into_values().collect()
		};
		if !drained.is_empty() {
			debug!(count = drained.len(), "Reprocessing pending entries");
		}
		for PendingEntry { entry, raw_deps, .. } in drained {
			debug!(dn = %entry.dn, raw_deps = raw_deps.len(), "Reprocessing pending entry");
			self.handle_entry(entry, &raw_deps).await;
		}
	}

	/// Admit one entry: coalesce with a pending entry of the same DN, resolve
	/// templates against a fresh binding snapshot, and either write the entry
	/// (returning its resolved DN, not yet marked synced) or install it as
	/// pending. A failed write drops the entry.
	async fn admit(
		&self,
		mut entry: TransformedEntry,
		mut raw_deps: Vec<String>,
	) -> Option<String> {
		let parent_key = normalize_dn(&entry.dn);
		if parent_key.is_empty() {
			error!("Transformed entry has empty DN; skipping dependency processing");
			return None;
		}

		{
			let mut state = self.state.lock().await;
			if let Some(existing) = state.pending.remove(&parent_key) {
				entry.content = merge_content(existing.entry.content, entry.content);
				raw_deps.extend(existing.raw_deps);
				for dep_key in &existing.missing {
					if let Some(parents) = state.reverse.get_mut(dep_key) {
						parents.remove(&parent_key);
						if parents.is_empty() {
							state.reverse.remove(dep_key);
						}
					}
				}
			}
		}

		let snapshot = self.bindings.snapshot().await;
		let (resolved_entry, entry_missing) = resolve_entry(&entry, &snapshot);
		let (resolved_deps, deps_missing) = resolve_dependencies(&raw_deps, &snapshot);
		debug!(
			dn = %entry.dn,
			raw_deps = raw_deps.len(),
			resolved_deps = resolved_deps.len(),
			entry_missing,
			deps_missing,
			bindings_count = snapshot.values.len(),
			null_bindings_count = snapshot.nulls.len(),
			"Resolved dependencies"
		);

		let mut dep_set = BTreeSet::new();
		for dep in &resolved_deps {
			let dep_key = normalize_dn(dep);
			if dep_key.is_empty() || dep_key == parent_key {
				continue;
			}
			dep_set.insert(dep_key);
		}

		let mut state = self.state.lock().await;
		let missing: BTreeSet<String> =
			dep_set.iter().filter(|dep| !state.synced.contains(*dep)).cloned().collect();
		debug!(
			dn = %entry.dn,
			resolved_dependencies = ?dep_set,
			missing_dependencies = ?missing,
			missing_count = missing.len(),
			"Dependency state for entry"
		);

		if missing.is_empty() && !entry_missing && !deps_missing {
			drop(state);
			match self.writer.store(&resolved_entry).await {
				Ok(()) => return Some(resolved_entry.dn),
				Err(err) => {
					error!(dn = %resolved_entry.dn, %err, "Error storing entry in target LDAP");
					return None;
				}
			}
		}

		let dn = entry.dn.clone();
		let missing_count = missing.len();
		for dep_key in &missing {
			state.reverse.entry(dep_key.clone()).or_default().insert(parent_key.clone());
			debug!(dn = %dn, dependency = %dep_key, "Adding dependency");
		}
		state.pending.insert(
			parent_key,
			PendingEntry {
				entry: entry.clone(),
				raw_deps: raw_deps.clone(),
				missing: missing.into_iter().collect(),
			},
		);
		drop(state);

		if entry_missing || deps_missing {
			let missing_bindings = collect_missing_bindings(&entry, &raw_deps, &snapshot);
			info!(
				dn = %dn,
				missing_dependencies = missing_count,
				missing_bindings = ?missing_bindings,
				"Deferred entry until bindings are resolved"
			);
		} else {
			info!(
				dn = %dn,
				missing_dependencies = missing_count,
				"Deferred entry until dependencies are synced"
			);
		}
		None
	}

	/// Drive the release worklist starting from one freshly written DN. Ready
	/// entries are collected under the lock and written outside it; each
	/// successful write feeds the worklist in turn.
	async fn release_from(&self, first: String) {
		let mut work = VecDeque::from([first]);
		while let Some(dn) = work.pop_front() {
			let ready = self.settle(&dn).await;
			if ready.is_empty() {
				continue;
			}
			let snapshot = self.bindings.snapshot().await;
			for pending in ready {
				let (resolved, missing) = resolve_entry(&pending.entry, &snapshot);
				if missing {
					info!(dn = %pending.entry.dn, "Deferred entry still missing bindings on release");
					if let Some(written) = self.admit(pending.entry, pending.raw_deps).await {
						work.push_back(written);
					}
					continue;
				}
				match self.writer.store(&resolved).await {
					Ok(()) => {
						info!(dn = %resolved.dn, "Storing deferred entry in target LDAP");
						work.push_back(resolved.dn);
					}
					Err(err) => {
						error!(dn = %resolved.dn, %err, "Error storing deferred entry in target LDAP");
					}
				}
			}
		}
	}

	/// Mark `dn` synced and detach it from every pending entry waiting on it.
	/// Returns the entries whose missing set became empty.
	async fn settle(&self, dn: &str) -> Vec<PendingEntry> {
		let key = normalize_dn(dn);
		if key.is_empty() {
			return Vec::new();
		}
		let mut state = self.state.lock().await;
		if !state.synced.insert(key.clone()) {
			return Vec::new();
		}
		let Some(parents) = state.reverse.remove(&key) else { return Vec::new() };
		let mut ready = Vec::new();
		for parent_key in parents {
			let remaining = match state.pending.get_mut(&parent_key) {
				Some(pending) => {
					pending.missing.remove(&key);
					pending.missing.len()
				}
				None => continue,
			};
			debug!(
				parent_dn = %parent_key,
				resolved_dependency = %dn,
				remaining_dependencies = remaining,
				"Dependency resolved for parent"
			);
			if remaining == 0 {
				if let Some(pending) = state.pending.remove(&parent_key) {
					ready.push(pending);
				}
			}
		}
		debug!(dn = %dn, ready_to_release = ready.len(), "Dependency synced");
		ready
	}
}
