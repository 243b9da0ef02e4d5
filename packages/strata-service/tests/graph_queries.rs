use std::{sync::Arc, time::Duration};

use time::{Duration as TimeDelta, OffsetDateTime};

use strata_domain::{Direction, Namespace, RawNode};
use strata_service::{
	AddContentRequest, Error, GraphExportQuery, NeighborDirection, NeighborQuery, NodeDetailOptions,
};
use strata_testkit::{MENTIONS, MemoryGraph, edge, episode, node, test_service, user};

fn library() -> Arc<MemoryGraph> {
	let mut author = node("author", Namespace::Global);

	author.entity_type = Some("Author".to_string());

	MemoryGraph::new()
		.with_node(node("paper", Namespace::Global))
		.with_node(author)
		.with_node(node("alice-note", user("alice").expect("namespace")))
		.with_node(node("bob-note", user("bob").expect("namespace")))
		.with_edge(edge("e-note", "ANNOTATES", "alice-note", "paper"))
		.with_edge(edge("e-secret", "ANNOTATES", "bob-note", "paper"))
		.with_edge(edge("e-author", "AUTHORED_BY", "paper", "author"))
}

fn without_neighbors() -> NodeDetailOptions {
	NodeDetailOptions { include_neighbors: false, ..NodeDetailOptions::default() }
}

fn neighbor_uuids(neighbors: &[strata_service::Neighbor]) -> Vec<&str> {
	let mut uuids = neighbors.iter().map(|n| n.uuid.as_str()).collect::<Vec<_>>();

	uuids.sort_unstable();

	uuids
}

#[tokio::test]
async fn node_detail_hides_foreign_private_neighbors() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");
	let detail = service
		.get_node_detail("alice", "paper", &NodeDetailOptions::default())
		.await
		.expect("detail");
	let neighbors = detail.neighbors.expect("neighbors");

	assert_eq!(detail.namespace, Namespace::Global);
	assert_eq!(neighbor_uuids(&neighbors), vec!["alice-note", "author"]);
	assert!(!detail.has_more_neighbors);
}

#[tokio::test]
async fn node_detail_without_neighbors_skips_lookup() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");
	let detail = service
		.get_node_detail("alice", "paper", &without_neighbors())
		.await
		.expect("detail");

	assert!(detail.neighbors.is_none());
	assert_eq!(graph.neighbor_lookups(), 0);
}

#[tokio::test]
async fn private_nodes_are_owner_only() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");

	service
		.get_node_detail("alice", "alice-note", &without_neighbors())
		.await
		.expect("owner reads");

	assert!(matches!(
		service.get_node_detail("bob", "alice-note", &without_neighbors()).await,
		Err(Error::AccessDenied { .. })
	));
	assert!(matches!(
		service.get_node_detail("alice", "missing", &without_neighbors()).await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn neighbors_filter_by_direction_type_and_relation() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");
	let outgoing = NeighborQuery { direction: NeighborDirection::Outgoing, ..Default::default() };
	let set = service.get_neighbors("alice", "paper", &outgoing).await.expect("neighbors");

	assert_eq!(neighbor_uuids(&set.neighbors), vec!["author"]);
	assert_eq!(set.neighbors[0].direction, Direction::Outgoing);
	assert_eq!(set.neighbors[0].relation_type, "AUTHORED_BY");

	let authors = NeighborQuery { node_types: vec!["Author".to_string()], ..Default::default() };
	let set = service.get_neighbors("alice", "paper", &authors).await.expect("neighbors");

	assert_eq!(neighbor_uuids(&set.neighbors), vec!["author"]);

	let mismatch = NeighborQuery {
		node_types: vec!["Author".to_string()],
		relation_types: vec!["ANNOTATES".to_string()],
		..Default::default()
	};
	let set = service.get_neighbors("alice", "paper", &mismatch).await.expect("neighbors");

	assert!(set.neighbors.is_empty());
}

#[tokio::test]
async fn neighbor_limit_reports_more() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");
	let query = NeighborQuery { limit: Some(1), ..Default::default() };
	let set = service.get_neighbors("alice", "paper", &query).await.expect("neighbors");

	assert_eq!(set.neighbors.len(), 1);
	assert_eq!(set.total, 2);
	assert!(set.has_more);

	let zero = NeighborQuery { limit: Some(0), ..Default::default() };

	assert!(matches!(
		service.get_neighbors("alice", "paper", &zero).await,
		Err(Error::InvalidRequest { .. })
	));
}

#[tokio::test]
async fn edge_detail_requires_both_endpoints_readable() {
	let graph = library();
	let service = test_service(&graph, None).expect("service");
	let detail = service.get_edge_detail("alice", "e-note").await.expect("edge");

	assert_eq!(detail.source.uuid, "alice-note");
	assert_eq!(detail.target.uuid, "paper");
	assert_eq!(detail.relation_type, "ANNOTATES");
	assert!(matches!(
		service.get_edge_detail("alice", "e-secret").await,
		Err(Error::AccessDenied { .. })
	));
	assert!(matches!(
		service.get_edge_detail("alice", "e-missing").await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn dangling_edge_is_not_found() {
	let graph = library().with_edge(edge("e-dangling", "CITES", "paper", "ghost"));
	let service = test_service(&graph, None).expect("service");

	assert!(matches!(
		service.get_edge_detail("alice", "e-dangling").await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn add_content_defaults_to_the_private_graph() {
	let graph = MemoryGraph::new();
	let service = test_service(&graph, None).expect("service");
	let req = AddContentRequest {
		content: "Attention is all you need.".to_string(),
		namespace: None,
		metadata: Default::default(),
	};
	let receipt = service.add_content("alice", req).await.expect("add");

	assert_eq!(receipt.namespace, user("alice").expect("namespace"));
	assert_eq!(graph.episodes().len(), 1);
}

#[tokio::test]
async fn add_content_rejects_foreign_and_empty_input() {
	let graph = MemoryGraph::new();
	let service = test_service(&graph, None).expect("service");
	let foreign = AddContentRequest {
		content: "Private thoughts.".to_string(),
		namespace: Some(user("bob").expect("namespace")),
		metadata: Default::default(),
	};
	let empty =
		AddContentRequest { content: " ".to_string(), namespace: None, metadata: Default::default() };

	assert!(matches!(service.add_content("alice", foreign).await, Err(Error::AccessDenied { .. })));
	assert!(matches!(service.add_content("alice", empty).await, Err(Error::InvalidRequest { .. })));
	assert!(graph.episodes().is_empty());
}

#[tokio::test]
async fn community_rebuild_runs_in_the_background() {
	let graph = MemoryGraph::new();
	let service = test_service(&graph, None).expect("service");

	service.spawn_community_rebuild(vec![Namespace::Global]);

	for _ in 0..50 {
		if !graph.community_builds().is_empty() {
			break;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	assert_eq!(graph.community_builds().len(), 1);
}


fn alice_entity(uuid: &str, domain: &str) -> RawNode {
	let mut entity = node(uuid, user("alice").expect("namespace"));

	entity.properties.insert("domain".to_string(), serde_json::json!(domain));

	entity
}

/// Alice's private graph on top of the shared library: three more entities, one stale episode,
/// and a link into the shared graph.
fn notebook() -> Arc<MemoryGraph> {
	let now = OffsetDateTime::now_utc();
	let alice = user("alice").expect("namespace");
	let mut fresh = alice_entity("a1", "ai");
	let mut recent_edge = edge("e-13", "RELATES_TO", "a1", "a3");

	fresh.created_at = Some(now);
	recent_edge.created_at = Some(now);

	library()
		.with_node(fresh)
		.with_node(alice_entity("a2", "ai"))
		.with_node(alice_entity("a3", "nlp"))
		.with_node(episode("ep", alice, "Notes on attention.", now - TimeDelta::days(30)))
		.with_edge(edge("e-12", "RELATES_TO", "a1", "a2"))
		.with_edge(recent_edge)
		.with_edge(edge("e-cites", "CITES", "a1", "paper"))
		.with_edge(edge("e-ep", MENTIONS, "ep", "a1"))
}

#[tokio::test]
async fn node_detail_attaches_source_episodes_on_request() {
	let now = OffsetDateTime::now_utc();
	let long_body = "x".repeat(250);
	let graph = library()
		.with_node(episode("ep-old", Namespace::Global, "First reading.", now - TimeDelta::days(2)))
		.with_node(episode("ep-new", Namespace::Global, &long_body, now))
		.with_node(episode("ep-bob", user("bob").expect("namespace"), "Bob's take.", now))
		.with_edge(edge("m1", MENTIONS, "ep-old", "paper"))
		.with_edge(edge("m2", MENTIONS, "ep-new", "paper"))
		.with_edge(edge("m3", MENTIONS, "ep-bob", "paper"));
	let service = test_service(&graph, None).expect("service");
	let plain = service
		.get_node_detail("alice", "paper", &without_neighbors())
		.await
		.expect("detail");

	assert!(plain.source_episodes.is_none());

	let options = NodeDetailOptions { include_episodes: true, ..without_neighbors() };
	let detail = service.get_node_detail("alice", "paper", &options).await.expect("detail");
	let episodes = detail.source_episodes.expect("episodes");

	assert_eq!(episodes.iter().map(|e| e.uuid.as_str()).collect::<Vec<_>>(), vec!["ep-new", "ep-old"]);
	assert_eq!(episodes[0].content.len(), 203);
	assert!(episodes[0].content.ends_with("..."));
	assert_eq!(episodes[1].content, "First reading.");
}

#[tokio::test]
async fn namespace_export_defaults_to_the_callers_entities() {
	let graph = notebook();
	let service = test_service(&graph, None).expect("service");
	let export =
		service.get_namespace_graph("alice", &GraphExportQuery::default()).await.expect("export");
	let node_ids = export.nodes.iter().map(|n| n.uuid.as_str()).collect::<Vec<_>>();
	let mut edge_ids = export.edges.iter().map(|e| e.uuid.as_str()).collect::<Vec<_>>();

	edge_ids.sort_unstable();

	assert_eq!(export.namespace, user("alice").expect("namespace"));
	assert_eq!(node_ids, vec!["a1", "a2", "a3", "alice-note"]);
	assert_eq!(edge_ids, vec!["e-12", "e-13"]);
	assert_eq!((export.node_count, export.edge_count), (4, 2));
	assert!(!export.truncated);

	let with_episodes = GraphExportQuery { include_episodes: true, ..Default::default() };
	let export = service.get_namespace_graph("alice", &with_episodes).await.expect("export");

	assert_eq!(export.node_count, 5);
	assert!(export.edges.iter().any(|e| e.uuid == "e-ep"));
}

#[tokio::test]
async fn namespace_export_enforces_ownership_and_limits() {
	let graph = notebook();
	let service = test_service(&graph, None).expect("service");
	let foreign =
		GraphExportQuery { namespace: Some(user("alice").expect("namespace")), ..Default::default() };
	let capped = GraphExportQuery { limit: Some(1), ..Default::default() };
	let zero = GraphExportQuery { limit: Some(0), ..Default::default() };

	assert!(matches!(
		service.get_namespace_graph("bob", &foreign).await,
		Err(Error::AccessDenied { .. })
	));

	let export = service.get_namespace_graph("alice", &capped).await.expect("export");

	assert_eq!(export.node_count, 1);
	assert!(export.edges.is_empty());
	assert!(export.truncated);
	assert!(matches!(
		service.get_namespace_graph("alice", &zero).await,
		Err(Error::InvalidRequest { .. })
	));
}

#[tokio::test]
async fn graph_stats_summarize_one_namespace() {
	let graph = notebook();
	let service = test_service(&graph, None).expect("service");
	let stats = service.get_graph_stats("alice", None).await.expect("stats");

	assert_eq!(stats.total_nodes, 5);
	assert_eq!((stats.node_types.entity, stats.node_types.episode), (4, 1));
	assert_eq!(stats.total_edges, 3);
	assert_eq!(stats.entity_domains.get("ai"), Some(&2));
	assert_eq!(stats.entity_domains.get("nlp"), Some(&1));
	assert_eq!(stats.top_entities[0].uuid, "a1");
	assert_eq!(stats.top_entities[0].connection_count, 4);
	assert_eq!(stats.growth.last_7_days_nodes, 1);
	assert_eq!(stats.growth.last_7_days_edges, 1);
	assert!(matches!(
		service.get_graph_stats("bob", Some(&user("alice").expect("namespace"))).await,
		Err(Error::AccessDenied { .. })
	));
}
