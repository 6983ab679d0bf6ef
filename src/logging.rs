//! Logger initialization and runtime log-level control.
use std::sync::RwLock;

use tracing_subscriber::{
	filter::EnvFilter, layer::SubscriberExt, registry::Registry, reload, util::SubscriberInitExt,
};

use crate::error::Error;

/// The log levels the REST surface accepts.
pub const LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Handle for changing the log level at runtime and reporting the installed
/// one.
pub struct LogControl {
	/// Reload handle of the installed filter layer.
	handle: reload::Handle<EnvFilter, Registry>,
	/// The level most recently installed.
	current: RwLock<String>,
}

/// Install the global subscriber. The level is taken from the `--loglevel`
/// flag if given, then the `LOG_LEVEL` environment variable, defaulting to
/// "info"; unrecognized values also fall back to "info".
pub fn init(flag_level: Option<&str>) -> LogControl {
	let level = flag_level
		.map(ToOwned::to_owned)
		.or_else(|| std::env::var("LOG_LEVEL").ok())
		.filter(|level| !level.is_empty())
		.unwrap_or_else(|| "info".to_owned())
		.to_lowercase();
	let level = if LEVELS.contains(&level.as_str()) { level } else { "info".to_owned() };

	let (filter, handle) = reload::Layer::new(EnvFilter::new(&level));
	tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
	tracing::info!(level = %level, "Logger initialized");
	LogControl::from_handle(handle, &level)
}

impl LogControl {
	/// Wrap an existing reload handle. The filter layer must stay installed
	/// for reloads to take effect.
	#[must_use]
	pub fn from_handle(handle: reload::Handle<EnvFilter, Registry>, level: &str) -> Self {
		LogControl { handle, current: RwLock::new(level.to_owned()) }
	}

	/// The most recently installed level.
	#[must_use]
	pub fn current(&self) -> String {
		self.current.read().map_or_else(|err| err.into_inner().clone(), |level| level.clone())
	}

	/// Install a new level.
	pub fn set(&self, level: &str) -> Result<(), Error> {
		self.handle
			.reload(EnvFilter::new(level))
			.map_err(|err| Error::Invalid(err.to_string()))?;
		if let Ok(mut current) = self.current.write() {
			level.clone_into(&mut current);
		}
		tracing::info!(new_level = level, "Log level updated");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use tracing_subscriber::{filter::EnvFilter, reload};

	use super::LogControl;

	#[test]
	fn tracks_the_installed_level() {
		let (_filter, handle) = reload::Layer::new(EnvFilter::new("info"));
		let control = LogControl::from_handle(handle, "info");
		assert_eq!(control.current(), "info");
		control.set("debug").unwrap();
		assert_eq!(control.current(), "debug");
	}
}
