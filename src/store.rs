//! Postgres persistence for search specifications.
use sqlx::{
	postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode},
	Row,
};
use tracing::{debug, error, info};

use crate::{config::DatabaseConfig, error::Error, registry::SearchSpec};

/// Idempotent schema for the `searches` table.
const SCHEMA: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS searches (
		id TEXT PRIMARY KEY,
		filter TEXT NOT NULL,
		refresh INTEGER NOT NULL,
		base_dn TEXT NOT NULL,
		oneshot BOOLEAN NOT NULL,
		created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
		updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
	)",
	"CREATE INDEX IF NOT EXISTS searches_created_at_idx ON searches (created_at)",
	"CREATE INDEX IF NOT EXISTS searches_updated_at_idx ON searches (updated_at)",
];

/// Key/value-by-id storage of search specifications.
#[derive(Debug, Clone)]
pub struct SearchStore {
	/// Connection pool to the configured database.
	pool: PgPool,
}

impl SearchStore {
	/// Connect to the configured database, reading the password from the
	/// configured file, and create the schema if it does not exist yet.
	pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
		let password = tokio::fs::read_to_string(&config.password_file)
			.await
			.map_err(|err| {
				Error::Invalid(format!("failed to read database password file: {err}"))
			})?;
		let sslmode = if config.sslmode.is_empty() { "disable" } else { &config.sslmode };
		let sslmode: PgSslMode = sslmode
			.parse()
			.map_err(|err| Error::Invalid(format!("invalid sslmode: {err}")))?;
		let port = if config.port == 0 { 5432 } else { config.port };

		let options = PgConnectOptions::new()
			.host(&config.host)
			.port(port)
			.username(&config.username)
			.password(password.trim())
			.database(&config.database)
			.ssl_mode(sslmode);
		let pool = PgPoolOptions::new().connect_with(options).await?;

		let store = SearchStore { pool };
		store.ensure_schema().await?;
		info!("Database connection established successfully");
		Ok(store)
	}

	/// Create the table and indexes if missing.
	async fn ensure_schema(&self) -> Result<(), Error> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		Ok(())
	}

	/// Insert or update one search specification.
	pub async fn upsert(&self, id: &str, spec: &SearchSpec) -> Result<(), Error> {
		sqlx::query(
			"INSERT INTO searches (id, filter, refresh, base_dn, oneshot, created_at, updated_at)
			VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
			ON CONFLICT (id) DO UPDATE
			SET filter = $2, refresh = $3, base_dn = $4, oneshot = $5, updated_at = NOW()",
		)
		.bind(id)
		.bind(&spec.filter)
		.bind(i32::try_from(spec.refresh).unwrap_or(i32::MAX))
		.bind(&spec.base_dn)
		.bind(spec.oneshot)
		.execute(&self.pool)
		.await?;
		debug!(search_id = id, "Search saved to database");
		Ok(())
	}

	/// Delete one search specification.
	pub async fn delete(&self, id: &str) -> Result<(), Error> {
		sqlx::query("DELETE FROM searches WHERE id = $1").bind(id).execute(&self.pool).await?;
		debug!(search_id = id, "Search deleted from database");
		Ok(())
	}

	/// Load every persisted search specification. Rows that fail to decode
	/// are skipped.
	pub async fn load_all(&self) -> Result<Vec<(String, SearchSpec)>, Error> {
		let rows = sqlx::query("SELECT id, filter, refresh, base_dn, oneshot FROM searches")
			.fetch_all(&self.pool)
			.await?;

		let mut specs = Vec::with_capacity(rows.len());
		for row in rows {
			let decoded = (|| -> Result<(String, SearchSpec), sqlx::Error> {
				let id: String = row.try_get("id")?;
				let spec = SearchSpec {
					filter: row.try_get("filter")?,
					refresh: u32::try_from(row.try_get::<i32, _>("refresh")?).unwrap_or(0),
					base_dn: row.try_get("base_dn")?,
					oneshot: row.try_get("oneshot")?,
				};
				Ok((id, spec))
			})();
			match decoded {
				Ok(entry) => specs.push(entry),
				Err(err) => error!(%err, "Error scanning search row"),
			}
		}
		info!(count = specs.len(), "Loaded searches from database");
		Ok(specs)
	}
}
