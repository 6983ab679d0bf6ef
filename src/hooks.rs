//! Posting observed entries to the configured transformation hooks and
//! decoding their responses.
use std::{collections::HashMap, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
	config::HookRetryConfig,
	entry::{SourceEntry, TransformedEntry},
	error::Error,
};

/// A search definition provided by a hook response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSearchSpec {
	/// Unique search id.
	#[serde(default)]
	pub id: String,
	/// LDAP filter expression.
	#[serde(default)]
	pub filter: String,
	/// Refresh interval in seconds.
	#[serde(default)]
	pub refresh: u32,
	/// Base DN for the search. Defaults to the configured source base when
	/// empty.
	#[serde(default, rename = "baseDN")]
	pub base_dn: String,
	/// Whether the search runs exactly once without engaging the hooks.
	#[serde(default)]
	pub oneshot: bool,
}

/// One decoded hook response. A hook may return either a single response
/// object or an array of them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HookResponse {
	/// Entries to write to the target directory.
	#[serde(default)]
	pub transformed: Vec<TransformedEntry>,
	/// Searches to create or replace.
	#[serde(default)]
	pub derived: Vec<DerivedSearchSpec>,
	/// Dependency DNs shared by every transformed entry of this response.
	/// May contain `$name` tokens.
	#[serde(default)]
	pub dependencies: Vec<String>,
	/// Binding updates; a null value marks the name as known-absent.
	#[serde(default)]
	pub bindings: HashMap<String, Option<String>>,
	/// Clear every search's result cache so the next scan re-emits
	/// everything.
	#[serde(default)]
	pub reset: bool,
}

/// Decode a hook response body, accepting either a JSON array of responses or
/// a single response object.
pub fn decode_hook_responses(body: &[u8]) -> Result<Vec<HookResponse>, Error> {
	if let Ok(responses) = serde_json::from_slice::<Vec<HookResponse>>(body) {
		return Ok(responses);
	}
	if let Ok(single) = serde_json::from_slice::<HookResponse>(body) {
		return Ok(vec![single]);
	}
	Err(Error::Invalid("invalid hook response: expected object or array".to_owned()))
}

/// HTTP client for hook requests with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct HookClient {
	/// Shared HTTP client.
	client: reqwest::Client,
	/// Retry behaviour.
	retry: HookRetryConfig,
}

impl HookClient {
	/// Create a client with the given retry behaviour.
	#[must_use]
	pub fn new(retry: HookRetryConfig) -> Self {
		HookClient { client: reqwest::Client::new(), retry }
	}

	/// Post `payload` to `url` and decode the response body. HTTP error
	/// statuses are not retried; only transport-level failures are.
	pub async fn call(&self, url: &Url, payload: &SourceEntry) -> Result<Vec<HookResponse>, Error> {
		let response = self.post_with_retry(url, payload).await?;
		let body = response.bytes().await?;
		decode_hook_responses(&body)
	}

	/// Post with at most `retries + 1` attempts, doubling the delay after
	/// each attempt up to the configured cap, jittered by ±10%.
	async fn post_with_retry(
		&self,
		url: &Url,
		payload: &SourceEntry,
	) -> Result<reqwest::Response, Error> {
		let retries = self.retry.retries();
		let max_delay = self.retry.max_delay();
		let mut delay = self.retry.initial_delay();

		for attempt in 0..=retries {
			if attempt > 0 {
				let sleep = jittered(delay);
				debug!(url = %url, attempt = attempt + 1, delay = ?sleep, "Retrying hook request");
				tokio::time::sleep(sleep).await;
				delay = (delay * 2).min(max_delay);
			}
			match self.client.post(url.clone()).json(payload).send().await {
				Ok(response) => return Ok(response),
				Err(err) if attempt < retries => {
					warn!(url = %url, attempt = attempt + 1, %err, "Hook request failed, will retry");
				}
				Err(err) => {
					return Err(Error::HookRetries { attempts: retries + 1, source: err });
				}
			}
		}
		Err(Error::Invalid("hook retry loop exhausted".to_owned()))
	}
}

/// Spread a delay by ±10% to avoid thundering herds.
fn jittered(delay: Duration) -> Duration {
	let factor = 1.0 + 0.1 * rand::thread_rng().gen_range(-1.0..=1.0);
	delay.mul_f64(factor)
}
