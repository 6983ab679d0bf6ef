//! The synchronization engine: composes the result cache, hook dispatch,
//! dependency resolver, target writer and search registry, and owns the
//! lifecycle of the scheduler tasks.
use std::sync::Arc;

use ldap3::SearchEntry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
	bindings::BindingStore,
	cache::{Observation, ResultCache},
	config::Config,
	entry::{content_from_search, SourceEntry},
	hooks::{DerivedSearchSpec, HookClient, HookResponse},
	registry::{Registry, RegistryError, SearchSpec},
	resolver::Resolver,
	scheduler::run_search,
	store::SearchStore,
	writer::{EntryWriter, LdapWriter},
};

/// The synchronization engine. One instance per process, shared with the
/// REST layer and every scheduler task.
pub struct Engine {
	/// Static service configuration.
	config: Config,
	/// Live searches and their cancellation tokens.
	registry: Registry,
	/// Per-search result caches.
	cache: ResultCache,
	/// Bindings published by hooks.
	bindings: Arc<BindingStore>,
	/// Dependency-ordered release of target writes.
	resolver: Resolver,
	/// Outbound hook client.
	hooks: HookClient,
	/// Optional search persistence.
	store: Option<SearchStore>,
}

impl Engine {
	/// Create an engine writing to the configured target directory.
	#[must_use]
	pub fn new(config: Config, store: Option<SearchStore>) -> Arc<Self> {
		let writer = Arc::new(LdapWriter::new(config.target.clone()));
		Self::with_writer(config, store, writer)
	}

	/// Create an engine with a custom entry writer.
	#[must_use]
	pub fn with_writer(
		config: Config,
		store: Option<SearchStore>,
		writer: Arc<dyn EntryWriter>,
	) -> Arc<Self> {
		let bindings = Arc::new(BindingStore::default());
		let resolver = Resolver::new(Arc::clone(&bindings), writer);
		let hooks = HookClient::new(config.hook_retry.clone());
		Arc::new(Engine {
			config,
			registry: Registry::default(),
			cache: ResultCache::default(),
			bindings,
			resolver,
			hooks,
			store,
		})
	}

	/// The engine configuration.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// The live search registry.
	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// The per-search result caches.
	#[must_use]
	pub fn cache(&self) -> &ResultCache {
		&self.cache
	}

	/// Register and start every search loaded from the persistence store.
	/// Load failures are logged; the engine continues with what it has.
	pub async fn prime_from_store(self: &Arc<Self>) {
		let Some(store) = &self.store else { return };
		match store.load_all().await {
			Ok(specs) => {
				for (id, spec) in specs {
					match self.registry.create(&id, spec.clone()).await {
						Ok(token) => {
							self.cache.insert_search(&id).await;
							self.spawn(id.clone(), spec, token);
							info!(search_id = %id, "Restored search from database");
						}
						Err(err) => {
							error!(search_id = %id, %err, "Error restoring search")
						}
					}
				}
			}
			Err(err) => error!(%err, "Error loading searches from database"),
		}
	}

	/// Register a new search, persist it and start its scheduler task.
	pub async fn create_search(
		self: &Arc<Self>,
		id: &str,
		spec: SearchSpec,
	) -> Result<(), RegistryError> {
		let token = self.registry.create(id, spec.clone()).await?;
		self.cache.insert_search(id).await;
		self.persist(id, &spec).await;
		self.spawn(id.to_owned(), spec, token);
		Ok(())
	}

	/// Replace an existing search: the prior task is cancelled and a new one
	/// started. The result cache is preserved across the replacement.
	pub async fn replace_search(
		self: &Arc<Self>,
		id: &str,
		spec: SearchSpec,
	) -> Result<(), RegistryError> {
		let token = self.registry.replace(id, spec.clone()).await?;
		self.persist(id, &spec).await;
		self.spawn(id.to_owned(), spec, token);
		Ok(())
	}

	/// Cancel and remove a search, dropping its result cache.
	pub async fn delete_search(self: &Arc<Self>, id: &str) -> Result<(), RegistryError> {
		self.registry.delete(id).await?;
		self.cache.remove_search(id).await;
		if let Some(store) = &self.store {
			if let Err(err) = store.delete(id).await {
				error!(search_id = id, %err, "Failed to delete search from database");
			}
		}
		Ok(())
	}

	/// Write a search spec through to the persistence store, best-effort.
	async fn persist(&self, id: &str, spec: &SearchSpec) {
		if let Some(store) = &self.store {
			if let Err(err) = store.upsert(id, spec).await {
				error!(search_id = id, %err, "Failed to save search to database");
			}
		}
	}

	/// Start the scheduler task for one search.
	fn spawn(self: &Arc<Self>, id: String, spec: SearchSpec, token: CancellationToken) {
		let engine = Arc::clone(self);
		tokio::spawn(run_search(engine, id, spec, token));
	}

	/// Record one observed source entry and fan it out to the hooks when it
	/// is new or changed and the owning search is not oneshot.
	pub async fn process_source_entry(self: &Arc<Self>, id: &str, entry: SearchEntry, oneshot: bool) {
		let result = SourceEntry { dn: entry.dn.clone(), content: content_from_search(&entry) };
		match self.cache.observe(id, result.clone()).await {
			None => warn!(search_id = id, dn = %result.dn, "Search results missing for id"),
			Some(Observation::New) => {
				info!(dn = %result.dn, search_id = id, "New item retrieved");
				if !oneshot {
					self.dispatch_hooks(result);
				}
			}
			Some(Observation::Changed) => {
				info!(dn = %result.dn, search_id = id, "Updated item search");
				if !oneshot {
					self.dispatch_hooks(result);
				}
			}
			Some(Observation::Unchanged) => debug!(dn = %result.dn, search_id = id, "No change"),
		}
	}

	/// Post one observed entry to every configured hook, each on its own
	/// fire-and-forget task.
	pub fn dispatch_hooks(self: &Arc<Self>, result: SourceEntry) {
		for url in self.config.hooks.clone() {
			let engine = Arc::clone(self);
			let payload = result.clone();
			tokio::spawn(async move {
				match engine.hooks.call(&url, &payload).await {
					Ok(responses) => {
						for response in responses {
							engine.process_hook_response(response).await;
						}
					}
					Err(err) => error!(url = %url, %err, "Error posting to hook"),
				}
			});
		}
	}

	/// Route the parts of one decoded hook response: bindings first, then
	/// transformed entries (sharing the response's dependency list), then
	/// derived searches, then the reset directive.
	pub async fn process_hook_response(self: &Arc<Self>, response: HookResponse) {
		let HookResponse { transformed, derived, dependencies, bindings, reset } = response;
		debug!(
			transformed = transformed.len(),
			derived = derived.len(),
			reset,
			"Processing hook response"
		);

		if !bindings.is_empty() {
			debug!(count = bindings.len(), "Hook bindings received");
			if self.bindings.apply(bindings).await {
				self.resolver.reprocess_pending().await;
			}
		}

		if transformed.is_empty() {
			info!("No transformed data in hook response");
		} else {
			for entry in transformed {
				debug!(dn = %entry.dn, "Processing transformed hook response for DN");
				self.resolver.handle_entry(entry, &dependencies).await;
			}
		}

		for spec in derived {
			self.apply_derived(spec).await;
		}

		if reset {
			// Reset is a legacy workaround; dependency handling should
			// eventually make this obsolete.
			info!("Reset directive received. Discarding internal search results");
			self.cache.reset_all().await;
		}
	}

	/// Create or replace a search from a hook's derived list.
	async fn apply_derived(self: &Arc<Self>, derived: DerivedSearchSpec) {
		let DerivedSearchSpec { id, filter, refresh, mut base_dn, oneshot } = derived;
		if base_dn.is_empty() {
			base_dn = self.config.source.base_dn.clone();
		}
		let spec = SearchSpec { filter, refresh, base_dn, oneshot };
		if self.registry.contains(&id).await {
			match self.replace_search(&id, spec).await {
				Ok(()) => info!(search_id = %id, "Derived search updated"),
				Err(err) => error!(search_id = %id, %err, "Error updating derived search"),
			}
		} else {
			match self.create_search(&id, spec).await {
				Ok(()) => info!(search_id = %id, "Derived search created"),
				Err(err) => error!(search_id = %id, %err, "Error creating derived search"),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use url::Url;

	use super::Engine;
	use crate::{
		config::{Config, DatabaseConfig, HookRetryConfig, LdapConfig},
		entry::SourceEntry,
		hooks::{DerivedSearchSpec, HookResponse},
		registry::SearchSpec,
	};

	fn ldap_config(base_dn: &str) -> LdapConfig {
		LdapConfig {
			url: Url::parse("ldap://127.0.0.1:1").unwrap(),
			bind_dn: "cn=admin,dc=x".to_owned(),
			bind_password: "secret".to_owned(),
			base_dn: base_dn.to_owned(),
			connection: Default::default(),
		}
	}

	fn config() -> Config {
		Config {
			source: ldap_config("dc=x"),
			target: ldap_config("dc=y"),
			hooks: Vec::new(),
			database: DatabaseConfig::default(),
			hook_retry: HookRetryConfig::default(),
			listen: "127.0.0.1:0".parse().unwrap(),
		}
	}

	fn derived(id: &str, filter: &str, base_dn: &str) -> DerivedSearchSpec {
		DerivedSearchSpec {
			id: id.to_owned(),
			filter: filter.to_owned(),
			refresh: 3600,
			base_dn: base_dn.to_owned(),
			oneshot: false,
		}
	}

	#[tokio::test]
	async fn derived_searches_are_created_and_updated() {
		let engine = Engine::new(config(), None);

		let response =
			HookResponse { derived: vec![derived("users-of-grp", "(memberOf=grp)", "ou=u,dc=x")], ..Default::default() };
		engine.process_hook_response(response).await;
		assert_eq!(engine.registry().get("users-of-grp").await.unwrap().filter, "(memberOf=grp)");
		assert!(engine.cache().entries("users-of-grp").await.is_some());

		let response = HookResponse {
			derived: vec![derived("users-of-grp", "(memberOf=other)", "ou=u,dc=x")],
			..Default::default()
		};
		engine.process_hook_response(response).await;
		assert_eq!(engine.registry().get("users-of-grp").await.unwrap().filter, "(memberOf=other)");

		engine.delete_search("users-of-grp").await.unwrap();
		assert!(!engine.registry().contains("users-of-grp").await);
		assert!(engine.cache().entries("users-of-grp").await.is_none());
	}

	#[tokio::test]
	async fn derived_search_without_base_dn_uses_the_source_base() {
		let engine = Engine::new(config(), None);
		let response =
			HookResponse { derived: vec![derived("d1", "(cn=*)", "")], ..Default::default() };
		engine.process_hook_response(response).await;
		assert_eq!(engine.registry().get("d1").await.unwrap().base_dn, "dc=x");
	}

	#[tokio::test]
	async fn reset_clears_every_result_cache() {
		let engine = Engine::new(config(), None);
		let spec = SearchSpec {
			filter: "(cn=*)".to_owned(),
			refresh: 3600,
			base_dn: "dc=x".to_owned(),
			oneshot: false,
		};
		engine.create_search("s1", spec).await.unwrap();
		engine
			.cache()
			.observe(
				"s1",
				SourceEntry { dn: "uid=a,dc=x".to_owned(), content: Default::default() },
			)
			.await
			.unwrap();
		assert_eq!(engine.cache().entries("s1").await.unwrap().len(), 1);

		let response = HookResponse { reset: true, ..Default::default() };
		engine.process_hook_response(response).await;
		assert_eq!(engine.cache().entries("s1").await.unwrap().len(), 0);
		assert!(engine.registry().contains("s1").await);

		engine.delete_search("s1").await.unwrap();
	}

	#[tokio::test]
	async fn create_search_rejects_duplicates() {
		let engine = Engine::new(config(), None);
		let spec = SearchSpec {
			filter: "(cn=*)".to_owned(),
			refresh: 3600,
			base_dn: "dc=x".to_owned(),
			oneshot: true,
		};
		engine.create_search("s1", spec.clone()).await.unwrap();
		assert!(engine.create_search("s1", spec).await.is_err());
		engine.delete_search("s1").await.unwrap();
	}
}
