//! Error codes

/// Errors that can occur when running the synchronization engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A required piece of data was missing.
	#[error("Missing data")]
	Missing,
	/// A value did not conform to the expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),

	/// An underlying IO error occurred.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// An underlying Rustls error occurred.
	#[error(transparent)]
	Rustls(#[from] rustls::Error),

	/// The configuration file failed to deserialize.
	#[error(transparent)]
	Yaml(#[from] serde_yaml::Error),

	/// A database operation failed.
	#[error(transparent)]
	Database(#[from] sqlx::Error),

	/// An outbound HTTP request failed.
	#[error(transparent)]
	Http(#[from] reqwest::Error),

	/// A hook could not be reached after exhausting all retries.
	#[error("failed after {attempts} attempts: {source}")]
	HookRetries {
		/// How many attempts were made in total.
		attempts: u32,
		/// The last transport error observed.
		source: reqwest::Error,
	},
}
