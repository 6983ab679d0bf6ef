//! Config for the synchronization engine.
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use ldap3::{LdapConnAsync, LdapConnSettings};
use rustls::{Certificate, RootCertStore};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::Error;

/// Engine configuration, read from a YAML file.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The LDAP server entries are read from.
	pub source: LdapConfig,
	/// The LDAP server transformed entries are written to.
	pub target: LdapConfig,
	/// URLs of the transformation hooks each observed entry is posted to.
	#[serde(default)]
	pub hooks: Vec<Url>,
	/// Optional persistence for search specifications.
	#[serde(default)]
	pub database: DatabaseConfig,
	/// Retry behaviour for hook requests.
	#[serde(default)]
	pub hook_retry: HookRetryConfig,
	/// Address the REST interface listens on.
	#[serde(default = "default_listen")]
	pub listen: SocketAddr,
}

/// Default listen address for the REST interface.
#[allow(clippy::expect_used)]
fn default_listen() -> SocketAddr {
	"0.0.0.0:5500".parse().expect("static listen address")
}

impl Config {
	/// Load the configuration from a YAML file.
	pub async fn load(path: &std::path::Path) -> Result<Self, Error> {
		let contents = tokio::fs::read(path).await?;
		Ok(serde_yaml::from_slice(&contents)?)
	}
}

/// Connection details for one LDAP server.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct LdapConfig {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// The DN to bind with.
	pub bind_dn: String,
	/// The password to bind with.
	pub bind_password: String,
	/// The default base DN for searches against this server.
	pub base_dn: String,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
}

impl LdapConfig {
	/// Open a fresh connection to the server and bind with the configured
	/// credentials. The connection is driven by a background task until it is
	/// unbound or dropped.
	pub async fn connect(&self) -> Result<ldap3::Ldap, Error> {
		let settings = self.connection.to_settings().await?;
		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &self.url).await?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		ldap.simple_bind(&self.bind_dn, &self.bind_password).await?.success()?;
		Ok(ldap)
	}
}

/// Connection behaviour for one directory server. The source and the target
/// each carry their own instance, so a TLS-terminated target can be paired
/// with a plaintext source and vice versa. Unset values fall back to the
/// [`LdapConnSettings`] defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Seconds to wait when establishing the connection. No limit if unset.
	#[serde(default)]
	pub connect_timeout: Option<u64>,

	/// Upgrade the plain port with the StartTLS extended operation instead
	/// of speaking TLS on a dedicated port.
	#[serde(default)]
	pub starttls: Option<bool>,

	/// Accept the server's certificate chain without verification.
	#[serde(default)]
	pub no_tls_verify: Option<bool>,

	/// PEM file with the root certificates the server's chain must anchor
	/// to. The process trust store applies if unset.
	#[serde(default)]
	pub root_certificate: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Translate this configuration into the [`LdapConnSettings`] for one
	/// connection attempt against the owning server.
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();
		if let Some(seconds) = self.connect_timeout {
			settings = settings.set_conn_timeout(Duration::from_secs(seconds));
		}
		if let Some(starttls) = self.starttls {
			settings = settings.set_starttls(starttls);
		}
		if let Some(no_tls_verify) = self.no_tls_verify {
			settings = settings.set_no_tls_verify(no_tls_verify);
		}
		if let Some(path) = &self.root_certificate {
			settings = settings.set_config(Arc::new(trusted_roots(path).await?));
		}
		Ok(settings)
	}
}

/// Build a TLS client configuration trusting exactly the certificates in the
/// PEM file at `path`.
async fn trusted_roots(path: &std::path::Path) -> Result<rustls::ClientConfig, Error> {
	let pem = tokio::fs::read(path).await?;
	let certs = rustls_pemfile::certs(&mut pem.as_slice())?;
	if certs.is_empty() {
		return Err(Error::Invalid(format!("no certificates in {}", path.display())));
	}
	let mut roots = RootCertStore::empty();
	for der in certs {
		roots.add(&Certificate(der))?;
	}
	Ok(rustls::ClientConfig::builder()
		.with_safe_defaults()
		.with_root_certificates(roots)
		.with_no_client_auth())
}

/// Database connection details for search persistence.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct DatabaseConfig {
	/// Whether searches should be persisted at all.
	#[serde(default)]
	pub enabled: bool,
	/// Database host.
	#[serde(default)]
	pub host: String,
	/// Database port. Defaults to 5432 when unset.
	#[serde(default)]
	pub port: u16,
	/// Database user.
	#[serde(default)]
	pub username: String,
	/// Database name.
	#[serde(default)]
	pub database: String,
	/// File the database password is read from.
	#[serde(default)]
	pub password_file: PathBuf,
	/// Postgres sslmode. Defaults to "disable" when unset.
	#[serde(default)]
	pub sslmode: String,
}

/// Retry behaviour for hook requests. Zero values fall back to the defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct HookRetryConfig {
	/// Number of retries after the initial attempt. Defaults to 10.
	#[serde(default)]
	pub max_retries: u32,
	/// Delay before the first retry in milliseconds. Defaults to 100.
	#[serde(default)]
	pub initial_delay_ms: u64,
	/// Upper bound on the retry delay in milliseconds. Defaults to 30000.
	#[serde(default)]
	pub max_delay_ms: u64,
}

impl HookRetryConfig {
	/// The number of retries after the initial attempt.
	#[must_use]
	pub fn retries(&self) -> u32 {
		if self.max_retries == 0 {
			10
		} else {
			self.max_retries
		}
	}

	/// The delay before the first retry.
	#[must_use]
	pub fn initial_delay(&self) -> Duration {
		Duration::from_millis(if self.initial_delay_ms == 0 { 100 } else { self.initial_delay_ms })
	}

	/// The upper bound on the retry delay.
	#[must_use]
	pub fn max_delay(&self) -> Duration {
		Duration::from_millis(if self.max_delay_ms == 0 { 30_000 } else { self.max_delay_ms })
	}
}
