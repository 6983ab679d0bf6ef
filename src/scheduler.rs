//! The polling loop run for each live search.
use std::{sync::Arc, time::Duration};

use ldap3::{
	adapters::{Adapter, EntriesOnly},
	Scope, SearchEntry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{engine::Engine, error::Error, registry::SearchSpec};

/// Poll the source directory until cancelled. Each iteration opens a fresh
/// connection, runs the subtree search and hands every returned entry to the
/// engine. Failures are logged and retried after one refresh interval; they
/// never remove the search or its result cache.
pub(crate) async fn run_search(
	engine: Arc<Engine>,
	id: String,
	spec: SearchSpec,
	token: CancellationToken,
) {
	loop {
		if token.is_cancelled() {
			info!(search_id = %id, "Search cancelled");
			return;
		}

		debug!(
			search_id = %id,
			filter = %spec.filter,
			base_dn = %spec.base_dn,
			"Performing LDAP search with filter"
		);
		match poll_once(&engine, &spec).await {
			Ok(entries) => {
				for entry in entries {
					engine.process_source_entry(&id, entry, spec.oneshot).await;
				}
				if spec.oneshot {
					info!(search_id = %id, "One-shot search completed");
					return;
				}
			}
			Err(err) => error!(search_id = %id, %err, "Error performing LDAP search"),
		}

		tokio::select! {
			() = token.cancelled() => {
				debug!(search_id = %id, "Search cancelled");
				return;
			}
			() = tokio::time::sleep(Duration::from_secs(spec.refresh.max(1).into())) => {}
		}
	}
}

/// Run one scan: connect, bind, search the subtree for all attributes, and
/// collect the entries before closing the connection.
async fn poll_once(engine: &Engine, spec: &SearchSpec) -> Result<Vec<SearchEntry>, Error> {
	let mut ldap = engine.config().source.connect().await?;
	let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
	let mut search = ldap
		.streaming_search_with(adapters, &spec.base_dn, Scope::Subtree, &spec.filter, vec!["*"])
		.await?;

	let mut entries = Vec::new();
	while let Some(entry) = search.next().await? {
		entries.push(SearchEntry::construct(entry));
	}
	search.finish().await.success()?;
	ldap.unbind().await?;

	Ok(entries)
}
