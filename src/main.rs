//! Service entry point.
use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use tracing::{error, info};

use ldap_sync::{api, config::Config, engine::Engine, error::Error, logging, store::SearchStore};

/// Synchronize entries between two LDAP directories through HTTP
/// transformation hooks.
#[derive(Debug, Parser)]
#[command(name = "ldap-sync", version)]
struct Cli {
	/// Set the log level (debug, info, warn, error)
	#[arg(long)]
	loglevel: Option<String>,

	/// Path to the configuration file
	#[arg(long, default_value = "/etc/ldap-sync/config.yaml")]
	config: PathBuf,
}

/// Parse the CLI, install the logger and run the service.
#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	let log = logging::init(cli.loglevel.as_deref());
	match run(cli, log).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!(%err, "Fatal error");
			ExitCode::FAILURE
		}
	}
}

/// Load the configuration, prime the engine and serve the REST surface.
/// Errors here are fatal; data-plane errors later never are.
async fn run(cli: Cli, log: logging::LogControl) -> Result<(), Error> {
	let config = Config::load(&cli.config).await?;

	let store = if config.database.enabled {
		Some(SearchStore::connect(&config.database).await?)
	} else {
		info!("Database persistence disabled, searches will not be persisted");
		None
	};

	let listen = config.listen;
	let engine = Engine::new(config, store);
	engine.prime_from_store().await;

	let state = api::AppState { engine, log: Arc::new(log) };
	let listener = tokio::net::TcpListener::bind(listen).await?;
	info!(%listen, "Server started");
	axum::serve(listener, api::router(state)).await?;
	Ok(())
}
