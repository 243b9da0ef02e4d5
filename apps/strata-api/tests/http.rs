use std::sync::Arc;

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use strata_api::{routes, state::AppState};
use strata_domain::Namespace;
use strata_testkit::{MemoryGraph, edge, node, result, test_config, test_service, user};

fn app(graph: &Arc<MemoryGraph>, api_token: Option<&str>) -> (Router, Router) {
	let mut security = test_config().expect("config").security;

	security.api_auth_token = api_token.map(ToString::to_string);

	let state = AppState::from_service(test_service(graph, None).expect("service"), &security);

	(routes::router(state.clone()), routes::admin_router(state))
}

fn seeded() -> Arc<MemoryGraph> {
	MemoryGraph::new()
		.with_results(user("alice").expect("namespace"), vec![result("mine", 0.9)])
		.with_results(Namespace::Global, vec![result("shared", 0.8)])
		.with_node(node("paper", Namespace::Global))
		.with_node(node("note", user("alice").expect("namespace")))
		.with_edge(edge("e1", "ANNOTATES", "note", "paper"))
}

async fn json_body(response: axum::response::Response) -> Value {
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");

	serde_json::from_slice(&body).expect("Failed to parse response.")
}

fn post(uri: &str, identity: Option<&str>, payload: Value) -> Request<Body> {
	let mut builder =
		Request::builder().method("POST").uri(uri).header("content-type", "application/json");

	if let Some(identity) = identity {
		builder = builder.header(routes::HEADER_IDENTITY, identity);
	}

	builder.body(Body::from(payload.to_string())).expect("Failed to build request.")
}

fn get(uri: &str, identity: &str) -> Request<Body> {
	Request::builder()
		.uri(uri)
		.header(routes::HEADER_IDENTITY, identity)
		.body(Body::empty())
		.expect("Failed to build request.")
}

#[tokio::test]
async fn health_is_open() {
	let (app, _) = app(&seeded(), Some("secret"));
	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn search_falls_back_for_the_header_identity() {
	let (app, _) = app(&seeded(), None);
	let response = app
		.oneshot(post(
			"/v1/graph/search",
			Some("alice"),
			serde_json::json!({ "query": "attention", "limit": 5, "identity": "mallory" }),
		))
		.await
		.expect("Failed to call search.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json["total"], 2);
	assert_eq!(json["fallback_triggered"], true);
	assert_eq!(json["namespaces_searched"], serde_json::json!(["user:alice", "global"]));
	assert_eq!(json["results"][0]["source_namespace"], "user:alice");
	assert_eq!(json["rerank_mode"], "none");
}

#[tokio::test]
async fn search_validation_maps_to_bad_request() {
	let (app, _) = app(&seeded(), None);
	let response = app
		.oneshot(post("/v1/graph/search", Some("alice"), serde_json::json!({ "query": " " })))
		.await
		.expect("Failed to call search.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(json_body(response).await["error_code"], "invalid_query");
}

#[tokio::test]
async fn foreign_namespace_maps_to_forbidden() {
	let (app, _) = app(&seeded(), None);
	let response = app
		.oneshot(post(
			"/v1/graph/search",
			Some("alice"),
			serde_json::json!({ "query": "q", "namespace": "user:bob" }),
		))
		.await
		.expect("Failed to call search.");

	assert_eq!(response.status(), StatusCode::FORBIDDEN);
	assert_eq!(json_body(response).await["error_code"], "access_denied");
}

#[tokio::test]
async fn node_routes_enforce_visibility() {
	let graph = seeded();
	let (app, _) = app(&graph, None);
	let owner = app.clone().oneshot(get("/v1/graph/nodes/note", "alice")).await.expect("call");

	assert_eq!(owner.status(), StatusCode::OK);
	assert_eq!(json_body(owner).await["namespace"], "user:alice");

	let stranger = app.clone().oneshot(get("/v1/graph/nodes/note", "bob")).await.expect("call");

	assert_eq!(stranger.status(), StatusCode::FORBIDDEN);

	let missing = app.clone().oneshot(get("/v1/graph/nodes/ghost", "bob")).await.expect("call");

	assert_eq!(missing.status(), StatusCode::NOT_FOUND);

	let neighbors = app
		.oneshot(get("/v1/graph/nodes/paper/neighbors?direction=incoming", "bob"))
		.await
		.expect("call");
	let json = json_body(neighbors).await;

	assert_eq!(json["total"], 0);
	assert_eq!(json["has_more"], false);
}

#[tokio::test]
async fn node_routes_require_identity() {
	let (app, _) = app(&seeded(), None);
	let response = app
		.oneshot(Request::builder().uri("/v1/graph/nodes/paper").body(Body::empty()).expect("request"))
		.await
		.expect("call");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(json_body(response).await["fields"], serde_json::json!([routes::HEADER_IDENTITY]));
}

#[tokio::test]
async fn edge_and_path_routes_answer() {
	let (app, _) = app(&seeded(), None);
	let edge = app.clone().oneshot(get("/v1/graph/edges/e1", "alice")).await.expect("call");

	assert_eq!(edge.status(), StatusCode::OK);
	assert_eq!(json_body(edge).await["source"]["uuid"], "note");

	let paths = app
		.oneshot(post(
			"/v1/graph/paths",
			Some("alice"),
			serde_json::json!({ "source_uuid": "note", "target_uuid": "paper" }),
		))
		.await
		.expect("call");

	assert_eq!(paths.status(), StatusCode::OK);
	assert_eq!(json_body(paths).await["shortest_length"], 1);
}

#[tokio::test]
async fn namespace_stats_and_export_are_owner_scoped() {
	let graph = seeded();
	let (app, _) = app(&graph, None);
	let stats = app.clone().oneshot(get("/v1/graph/stats", "alice")).await.expect("stats");

	assert_eq!(stats.status(), StatusCode::OK);

	let stats = json_body(stats).await;

	assert_eq!(stats["namespace"], "user:alice");
	assert_eq!(stats["total_nodes"], 1);

	let export = app
		.clone()
		.oneshot(get("/v1/graph/export?namespace=global&include_episodes=true", "bob"))
		.await
		.expect("export");

	assert_eq!(export.status(), StatusCode::OK);
	assert_eq!(json_body(export).await["nodes"][0]["uuid"], "paper");

	let foreign = app
		.clone()
		.oneshot(get("/v1/graph/export?namespace=user:alice", "bob"))
		.await
		.expect("export");

	assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

	let bad_type =
		app.oneshot(get("/v1/graph/export?node_types=entity,paper", "alice")).await.expect("export");

	assert_eq!(bad_type.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn node_detail_lists_episodes_when_asked() {
	let (app, _) = app(&seeded(), None);
	let response = app
		.oneshot(get("/v1/graph/nodes/paper?include_neighbors=false&include_episodes=true", "alice"))
		.await
		.expect("node");

	assert_eq!(response.status(), StatusCode::OK);

	let body = json_body(response).await;

	assert_eq!(body["source_episodes"], serde_json::json!([]));
	assert_eq!(body["neighbors"], Value::Null);
}

#[tokio::test]
async fn episodes_are_created_in_the_private_graph() {
	let graph = seeded();
	let (app, _) = app(&graph, None);
	let response = app
		.oneshot(post(
			"/v1/graph/episodes",
			Some("alice"),
			serde_json::json!({ "content": "Read the sparse attention paper." }),
		))
		.await
		.expect("call");

	assert_eq!(response.status(), StatusCode::CREATED);
	assert_eq!(json_body(response).await["namespace"], "user:alice");
	assert_eq!(graph.episodes().len(), 1);
}

#[tokio::test]
async fn api_token_guards_graph_routes() {
	let (app, _) = app(&seeded(), Some("secret"));
	let denied = app
		.clone()
		.oneshot(post("/v1/graph/search", None, serde_json::json!({ "query": "q" })))
		.await
		.expect("call");

	assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

	let mut request = post("/v1/graph/search", None, serde_json::json!({ "query": "q" }));

	request.headers_mut().insert("Authorization", "Bearer secret".parse().expect("header"));

	let allowed = app.oneshot(request).await.expect("call");

	assert_eq!(allowed.status(), StatusCode::OK);
	assert_eq!(json_body(allowed).await["namespaces_searched"], serde_json::json!(["global"]));
}

#[tokio::test]
async fn admin_routes_expose_metrics_and_rebuild() {
	let graph = seeded();
	let (app, admin) = app(&graph, None);

	app.oneshot(post("/v1/graph/search", Some("alice"), serde_json::json!({ "query": "q" })))
		.await
		.expect("call");

	let rebuild = admin
		.clone()
		.oneshot(post(
			"/v1/admin/communities/rebuild",
			None,
			serde_json::json!({ "namespaces": ["global"] }),
		))
		.await
		.expect("call");

	assert_eq!(rebuild.status(), StatusCode::ACCEPTED);

	let metrics = admin
		.oneshot(Request::builder().uri("/v1/admin/metrics").body(Body::empty()).expect("request"))
		.await
		.expect("call");
	let json = json_body(metrics).await;

	assert_eq!(json["top_identities"][0]["identity"], "alice");
	assert!(json["total_requests"].as_u64().expect("count") >= 2);
}
