//! Continuously synchronize entries between two LDAP directories.
//!
//! The engine runs a set of polling searches against a source directory. Each
//! observed entry is checked against a per-search cache, and entries that are
//! new or changed are posted to a list of external HTTP transformation hooks.
//! A hook responds with entries to write to the target directory and may
//! additionally declare ordering dependencies between target entries, spawn
//! or update further searches, and publish named bindings that are
//! substituted into later entries via `$name` tokens.
//!
//! Transformed entries are only written once every declared dependency DN has
//! itself been written and every referenced binding is resolvable; until then
//! they are held in memory by the [`resolver`]. Writes go through a per-DN
//! lock with union-merge semantics for multi-valued attributes such as
//! `memberUid`.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate
//! which is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! A minimal example of running the service might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ldap_sync::{api, config::Config, engine::Engine, logging};
//!
//! let log = logging::init(None);
//! let config = Config::load(std::path::Path::new("/etc/ldap-sync/config.yaml")).await?;
//! let listen = config.listen;
//!
//! let engine = Engine::new(config, None);
//! engine.prime_from_store().await;
//!
//! let state = api::AppState { engine, log: Arc::new(log) };
//! let listener = tokio::net::TcpListener::bind(listen).await?;
//! axum::serve(listener, api::router(state)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Entries deleted at the source are not removed from the target nor from
//!   the result caches until a restart or a hook's `reset` directive.
//! * Dependency cycles are not detected; an unbreakable cycle leaves its
//!   entries pending forever.
//! * There is no backpressure; registry, caches and the pending state grow
//!   with the workload.

pub mod api;
pub mod bindings;
pub mod cache;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod registry;
pub mod resolver;
mod scheduler;
pub mod store;
mod template;
pub mod writer;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::Config,
	engine::Engine,
	entry::{SourceEntry, TransformedEntry},
	error::Error,
	registry::SearchSpec,
};
