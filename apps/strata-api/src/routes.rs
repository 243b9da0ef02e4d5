use axum::{
	Json, Router,
	extract::{Path, Query, Request, State},
	http::{HeaderMap, StatusCode},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use strata_domain::Namespace;
use strata_service::{
	AddContentRequest, AddContentResponse, ClientMetrics, EdgeDetail, Error, GraphExportQuery,
	GraphStats, IdentityStats, NamespaceGraph, NeighborDirection, NeighborQuery, NeighborSet,
	NodeDetail, NodeDetailOptions, PathRequest, PathSet, SearchRequest, SearchResponse,
};

pub const HEADER_IDENTITY: &str = "X-Strata-Identity";
const HEADER_AUTHORIZATION: &str = "Authorization";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/v1/graph/search", post(search))
		.route("/v1/graph/stats", get(graph_stats))
		.route("/v1/graph/export", get(graph_export))
		.route("/v1/graph/nodes/{uuid}", get(node_detail))
		.route("/v1/graph/nodes/{uuid}/neighbors", get(neighbors))
		.route("/v1/graph/edges/{uuid}", get(edge_detail))
		.route("/v1/graph/paths", post(paths))
		.route("/v1/graph/episodes", post(add_episode))
		.route_layer(middleware::from_fn_with_state(state.clone(), api_auth))
		.route("/health", get(health))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/communities/rebuild", post(rebuild_communities))
		.route("/v1/admin/metrics", get(metrics))
		.route("/v1/admin/metrics/identities/{identity}", get(identity_metrics))
		.route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
		.with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct NeighborParams {
	#[serde(default)]
	include_neighbors: Option<bool>,
	#[serde(default)]
	include_episodes: Option<bool>,
	#[serde(default)]
	direction: NeighborDirection,
	/// Comma-separated.
	#[serde(default)]
	node_types: Option<String>,
	/// Comma-separated.
	#[serde(default)]
	relation_types: Option<String>,
	#[serde(default)]
	limit: Option<u32>,
}
impl NeighborParams {
	fn query(&self) -> NeighborQuery {
		NeighborQuery {
			direction: self.direction,
			node_types: split_list(self.node_types.as_deref()),
			relation_types: split_list(self.relation_types.as_deref()),
			limit: self.limit,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceParams {
	#[serde(default)]
	namespace: Option<Namespace>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportParams {
	#[serde(default)]
	namespace: Option<Namespace>,
	#[serde(default)]
	include_episodes: Option<bool>,
	/// Comma-separated.
	#[serde(default)]
	node_types: Option<String>,
	#[serde(default)]
	limit: Option<u32>,
}
impl ExportParams {
	fn query(self) -> GraphExportQuery {
		GraphExportQuery {
			node_types: split_list(self.node_types.as_deref()),
			namespace: self.namespace,
			include_episodes: self.include_episodes.unwrap_or(false),
			limit: self.limit,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct RebuildRequest {
	#[serde(default)]
	namespaces: Vec<Namespace>,
}

#[derive(Debug, Serialize)]
struct Accepted {
	status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let message = err.to_string();

		match err {
			Error::InvalidQuery { .. } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_query", message, None),
			Error::InvalidRequest { .. } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message, None),
			Error::Namespace(_) =>
				json_error(StatusCode::BAD_REQUEST, "invalid_namespace", message, None),
			Error::AccessDenied { .. } =>
				json_error(StatusCode::FORBIDDEN, "access_denied", message, None),
			Error::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message, None),
			Error::Timeout { .. } =>
				json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message, None),
			Error::RerankFailed { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "rerank_failed", message, None),
			Error::Engine { .. } => {
				tracing::error!(error = %message, "Graph engine request failed.");

				json_error(StatusCode::BAD_GATEWAY, "engine_unavailable", message, None)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(mut payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	// The gateway header is the only source of identity; a body field cannot impersonate.
	payload.identity = read_identity(&headers)?;

	let response = state.service.search(payload).await?;

	Ok(Json(response))
}

async fn node_detail(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(uuid): Path<String>,
	Query(params): Query<NeighborParams>,
) -> Result<Json<NodeDetail>, ApiError> {
	let identity = require_identity(&headers)?;
	let options = NodeDetailOptions {
		include_neighbors: params.include_neighbors.unwrap_or(true),
		include_episodes: params.include_episodes.unwrap_or(false),
		neighbors: params.query(),
	};
	let response = state.service.get_node_detail(&identity, &uuid, &options).await?;

	Ok(Json(response))
}

async fn graph_stats(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(params): Query<NamespaceParams>,
) -> Result<Json<GraphStats>, ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.get_graph_stats(&identity, params.namespace.as_ref()).await?;

	Ok(Json(response))
}

async fn graph_export(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(params): Query<ExportParams>,
) -> Result<Json<NamespaceGraph>, ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.get_namespace_graph(&identity, &params.query()).await?;

	Ok(Json(response))
}

async fn neighbors(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(uuid): Path<String>,
	Query(params): Query<NeighborParams>,
) -> Result<Json<NeighborSet>, ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.get_neighbors(&identity, &uuid, &params.query()).await?;

	Ok(Json(response))
}

async fn edge_detail(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(uuid): Path<String>,
) -> Result<Json<EdgeDetail>, ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.get_edge_detail(&identity, &uuid).await?;

	Ok(Json(response))
}

async fn paths(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<PathRequest>,
) -> Result<Json<PathSet>, ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.find_paths(&identity, &payload).await?;

	Ok(Json(response))
}

async fn add_episode(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<AddContentRequest>,
) -> Result<(StatusCode, Json<AddContentResponse>), ApiError> {
	let identity = require_identity(&headers)?;
	let response = state.service.add_content(&identity, payload).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn rebuild_communities(
	State(state): State<AppState>,
	Json(payload): Json<RebuildRequest>,
) -> (StatusCode, Json<Accepted>) {
	state.service.spawn_community_rebuild(payload.namespaces);

	(StatusCode::ACCEPTED, Json(Accepted { status: "accepted" }))
}

async fn metrics(State(state): State<AppState>) -> Json<ClientMetrics> {
	Json(state.service.client.metrics())
}

async fn identity_metrics(
	State(state): State<AppState>,
	Path(identity): Path<String>,
) -> Json<IdentityStats> {
	Json(state.service.client.identity_stats(&identity))
}

async fn api_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
	if !is_authorized(req.headers(), state.api_auth_token.as_deref()) {
		return unauthorized();
	}

	next.run(req).await
}

async fn admin_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
	if !is_authorized(req.headers(), state.admin_auth_token.as_deref()) {
		return unauthorized();
	}

	next.run(req).await
}

fn unauthorized() -> Response {
	json_error(StatusCode::UNAUTHORIZED, "unauthorized", "A valid bearer token is required.", None)
		.into_response()
}

fn is_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
	match expected {
		None => true,
		Some(expected) => read_bearer_token(headers).is_some_and(|token| token == expected),
	}
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(HEADER_AUTHORIZATION)?;
	let value = raw.to_str().ok()?.trim();
	let token = value.strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

fn read_identity(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
	let Some(raw) = headers.get(HEADER_IDENTITY) else {
		return Ok(None);
	};
	let value = raw.to_str().map_err(|_| {
		json_error(
			StatusCode::BAD_REQUEST,
			"invalid_request",
			format!("{HEADER_IDENTITY} must be visible ASCII."),
			Some(vec![HEADER_IDENTITY.to_string()]),
		)
	})?;
	let value = value.trim();

	Ok(if value.is_empty() { None } else { Some(value.to_string()) })
}

fn require_identity(headers: &HeaderMap) -> Result<String, ApiError> {
	read_identity(headers)?.ok_or_else(|| {
		json_error(
			StatusCode::BAD_REQUEST,
			"invalid_request",
			format!("{HEADER_IDENTITY} header is required."),
			Some(vec![HEADER_IDENTITY.to_string()]),
		)
	})
}

fn split_list(raw: Option<&str>) -> Vec<String> {
	raw.map(|raw| {
		raw.split(',').map(str::trim).filter(|item| !item.is_empty()).map(ToString::to_string).collect()
	})
	.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bearer_token_is_required_only_when_configured() {
		let mut headers = HeaderMap::new();

		assert!(is_authorized(&headers, None));
		assert!(!is_authorized(&headers, Some("secret")));

		headers.insert(HEADER_AUTHORIZATION, "Bearer secret".parse().expect("valid header"));

		assert!(is_authorized(&headers, Some("secret")));
		assert!(!is_authorized(&headers, Some("other")));
	}

	#[test]
	fn blank_identity_header_is_anonymous() {
		let mut headers = HeaderMap::new();

		headers.insert(HEADER_IDENTITY, "   ".parse().expect("valid header"));

		assert_eq!(read_identity(&headers).expect("identity"), None);
		assert!(require_identity(&headers).is_err());
	}

	#[test]
	fn list_params_split_on_commas() {
		assert_eq!(split_list(Some("Paper, Author,,")), vec!["Paper", "Author"]);
		assert!(split_list(None).is_empty());
	}
}
