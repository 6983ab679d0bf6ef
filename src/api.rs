//! The REST control surface: CRUD for searches, result read-out, runtime
//! log-level changes and the liveness/readiness probes.
use std::sync::Arc;

use axum::{
	extract::{rejection::JsonRejection, Path, Query, Request, State},
	http::StatusCode,
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post, put},
	Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
	engine::Engine,
	logging::{LogControl, LEVELS},
	registry::{RegistryError, SearchSpec},
};

/// Shared state for the REST handlers.
#[derive(Clone)]
pub struct AppState {
	/// The synchronization engine.
	pub engine: Arc<Engine>,
	/// Runtime log-level control.
	pub log: Arc<LogControl>,
}

/// Build the router serving the REST surface.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/search", post(create_search).get(get_search))
		.route("/search/:id", put(update_search).delete(delete_search))
		.route("/results/:id", get(get_results))
		.route("/loglevel", get(get_log_level).put(put_log_level))
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz))
		.layer(middleware::from_fn(log_requests))
		.with_state(state)
}

/// One search as reported by the REST surface.
#[derive(Debug, Serialize)]
struct SearchInfo {
	/// Unique search id.
	id: String,
	/// LDAP filter expression.
	filter: String,
	/// Refresh interval in seconds.
	refresh: u32,
	/// Base DN of the search.
	#[serde(rename = "BaseDN")]
	base_dn: String,
	/// Whether the search runs in one-shot mode.
	#[serde(rename = "Oneshot")]
	oneshot: bool,
}

impl SearchInfo {
	fn new(id: String, spec: SearchSpec) -> Self {
		SearchInfo {
			id,
			filter: spec.filter,
			refresh: spec.refresh,
			base_dn: spec.base_dn,
			oneshot: spec.oneshot,
		}
	}
}

/// Form fields accepted by search create and update.
#[derive(Debug, Default, Deserialize)]
struct SearchForm {
	/// Unique search id (create only).
	#[serde(default)]
	id: Option<String>,
	/// LDAP filter expression.
	#[serde(default)]
	filter: Option<String>,
	/// Refresh interval in seconds.
	#[serde(default)]
	refresh: Option<String>,
	/// Base DN; defaults to the configured source base.
	#[serde(default, rename = "baseDN")]
	base_dn: Option<String>,
	/// One-shot mode; defaults to true.
	#[serde(default, rename = "oneShot")]
	one_shot: Option<String>,
}

/// Validate the shared create/update form fields into a [`SearchSpec`].
fn parse_spec(form: &SearchForm, default_base_dn: &str) -> Result<SearchSpec, Response> {
	let filter = form.filter.as_deref().unwrap_or_default().trim().to_owned();
	let refresh = form.refresh.as_deref().unwrap_or_default();
	if filter.is_empty() || refresh.is_empty() {
		return Err((
			StatusCode::BAD_REQUEST,
			"Missing required parameters (id, filter, refresh)",
		)
			.into_response());
	}
	let refresh: u32 = refresh
		.parse()
		.map_err(|_| (StatusCode::BAD_REQUEST, "Invalid refresh parameter").into_response())?;
	let oneshot = match form.one_shot.as_deref() {
		None | Some("") => true,
		Some(value) => value.parse().map_err(|_| {
			(StatusCode::BAD_REQUEST, "Invalid oneShot parameter").into_response()
		})?,
	};
	let base_dn = match form.base_dn.as_deref() {
		None | Some("") => default_base_dn.to_owned(),
		Some(base_dn) => base_dn.to_owned(),
	};
	Ok(SearchSpec { filter, refresh, base_dn, oneshot })
}

/// `POST /search` — create a new search with a unique id.
async fn create_search(State(state): State<AppState>, form: Option<Form<SearchForm>>) -> Response {
	let Form(form) = form.unwrap_or_default();
	let id = form.id.clone().unwrap_or_default();
	if id.is_empty() {
		return (StatusCode::BAD_REQUEST, "Missing required parameters (id, filter, refresh)")
			.into_response();
	}
	let spec = match parse_spec(&form, &state.engine.config().source.base_dn) {
		Ok(spec) => spec,
		Err(response) => return response,
	};
	match state.engine.create_search(&id, spec).await {
		Ok(()) => (StatusCode::OK, "Search created").into_response(),
		Err(RegistryError::Exists) => {
			(StatusCode::BAD_REQUEST, "Search with this id already exists").into_response()
		}
		Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
	}
}

/// Query parameters of `GET /search`.
#[derive(Debug, Deserialize)]
struct SearchQuery {
	/// Search id to look up; all searches are returned when absent.
	#[serde(default)]
	id: Option<String>,
}

/// `GET /search` — one search by id, or all searches.
async fn get_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
	if let Some(id) = query.id.filter(|id| !id.is_empty()) {
		return match state.engine.registry().get(&id).await {
			Some(spec) => Json(SearchInfo::new(id, spec)).into_response(),
			None => (StatusCode::NOT_FOUND, "Search with given id not found").into_response(),
		};
	}
	let searches: Vec<SearchInfo> = state
		.engine
		.registry()
		.list()
		.await
		.into_iter()
		.map(|(id, spec)| SearchInfo::new(id, spec))
		.collect();
	Json(searches).into_response()
}

/// `PUT /search/:id` — replace an existing search.
async fn update_search(
	State(state): State<AppState>,
	Path(id): Path<String>,
	form: Option<Form<SearchForm>>,
) -> Response {
	let Form(form) = form.unwrap_or_default();
	let spec = match parse_spec(&form, &state.engine.config().source.base_dn) {
		Ok(spec) => spec,
		Err(response) => return response,
	};
	match state.engine.replace_search(&id, spec).await {
		Ok(()) => (StatusCode::OK, "Search updated").into_response(),
		Err(RegistryError::Missing) => {
			(StatusCode::BAD_REQUEST, "Search with this id does not exist").into_response()
		}
		Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
	}
}

/// `DELETE /search/:id` — cancel and remove a search.
async fn delete_search(State(state): State<AppState>, Path(id): Path<String>) -> Response {
	match state.engine.delete_search(&id).await {
		Ok(()) => (StatusCode::OK, "Search deleted").into_response(),
		Err(_) => (StatusCode::NOT_FOUND, "Search not found").into_response(),
	}
}

/// Query parameters of `GET /results/:id`.
#[derive(Debug, Deserialize)]
struct ResultsQuery {
	/// Return DN and content instead of DN only.
	#[serde(default)]
	full: Option<String>,
}

/// A result entry reduced to its DN.
#[derive(Debug, Serialize)]
struct ResultEntrySimple {
	/// Distinguished name of the cached entry.
	dn: String,
}

/// `GET /results/:id` — the cached entries of one search, DNs only unless
/// `full=true`.
async fn get_results(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Query(query): Query<ResultsQuery>,
) -> Response {
	let Some(entries) = state.engine.cache().entries(&id).await else {
		return (StatusCode::NOT_FOUND, format!("Search results not found for id: {id}"))
			.into_response();
	};
	let full = query.full.as_deref().unwrap_or_default().parse().unwrap_or(false);
	if full {
		return Json(entries).into_response();
	}
	let dns: Vec<ResultEntrySimple> =
		entries.into_iter().map(|entry| ResultEntrySimple { dn: entry.dn }).collect();
	Json(dns).into_response()
}

/// Payload of `PUT /loglevel`.
#[derive(Debug, Deserialize)]
struct LogLevelRequest {
	/// The level to install.
	level: String,
}

/// `GET /loglevel` — report the installed log level.
async fn get_log_level(State(state): State<AppState>) -> Response {
	Json(json!({ "level": state.log.current() })).into_response()
}

/// `PUT /loglevel` — change the log level at runtime.
async fn put_log_level(
	State(state): State<AppState>,
	payload: Result<Json<LogLevelRequest>, JsonRejection>,
) -> Response {
	let Ok(Json(request)) = payload else {
		error!("Failed to bind log level request");
		return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid payload" })))
			.into_response();
	};
	let level = request.level.to_lowercase();
	if !LEVELS.contains(&level.as_str()) {
		error!(level = %request.level, "Invalid log level provided");
		return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid log level" })))
			.into_response();
	}
	if let Err(err) = state.log.set(&level) {
		error!(%err, "Failed to update log level");
		return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid log level" })))
			.into_response();
	}
	Json(json!({ "message": "Log level updated", "level": request.level })).into_response()
}

/// `GET /healthz` — liveness probe.
async fn healthz() -> Json<serde_json::Value> {
	Json(json!({ "status": "ok" }))
}

/// `GET /readyz` — readiness probe.
async fn readyz() -> Json<serde_json::Value> {
	Json(json!({ "status": "ready" }))
}

/// Log every handled request except the probe endpoints.
async fn log_requests(request: Request, next: Next) -> Response {
	let method = request.method().clone();
	let path = request.uri().path().to_owned();
	let response = next.run(request).await;
	if path != "/healthz" && path != "/readyz" {
		info!(%method, %path, status = response.status().as_u16(), "Handled request");
	}
	response
}
