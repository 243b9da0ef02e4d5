use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;

use strata_domain::Namespace;
use strata_service::{ClientLimits, EngineCapabilities, Error};
use strata_testkit::{MemoryGraph, result, test_client, user};

fn limits() -> ClientLimits {
	ClientLimits { drain_timeout: Duration::from_secs(2), ..ClientLimits::default() }
}

#[tokio::test]
async fn engine_connects_once_under_concurrent_first_use() {
	let graph = MemoryGraph::new().with_connect_delay(Duration::from_millis(50));
	let client = test_client(&graph, limits(), EngineCapabilities::default());
	let mut tasks = JoinSet::new();

	for _ in 0..10 {
		let client = Arc::clone(&client);

		tasks.spawn(async move { client.init().await });
	}

	while let Some(joined) = tasks.join_next().await {
		joined.expect("task").expect("init");
	}

	assert_eq!(graph.connects(), 1);
	assert!(client.is_initialized());
}

#[tokio::test]
async fn failed_connection_is_retried_on_next_use() {
	let graph = MemoryGraph::new().with_failing_connects(1);
	let client = test_client(&graph, limits(), EngineCapabilities::default());

	assert!(matches!(client.init().await, Err(Error::Engine { .. })));
	assert!(!client.is_initialized());

	client.init().await.expect("second attempt");

	assert_eq!(graph.connects(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identity_limit_bounds_in_flight_calls() {
	let graph = MemoryGraph::new()
		.with_results(Namespace::Global, vec![result("g", 0.5)])
		.with_search_delay(Namespace::Global, Duration::from_millis(50));
	let client = test_client(
		&graph,
		ClientLimits { max_concurrency_per_identity: 2, ..limits() },
		EngineCapabilities::default(),
	);
	let mut tasks = JoinSet::new();

	for _ in 0..6 {
		let client = Arc::clone(&client);

		tasks.spawn(async move {
			client.search("alice", "q", &Namespace::Global, None, 10, None).await
		});
	}

	while let Some(joined) = tasks.join_next().await {
		assert_eq!(joined.expect("task").expect("search").len(), 1);
	}

	assert_eq!(graph.peak_in_flight(), 2);
	assert_eq!(client.metrics().successful_requests, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identities_do_not_share_slots() {
	let graph = MemoryGraph::new().with_search_delay(Namespace::Global, Duration::from_millis(100));
	let client = test_client(
		&graph,
		ClientLimits { max_concurrency_per_identity: 1, ..limits() },
		EngineCapabilities::default(),
	);
	let mut tasks = JoinSet::new();

	for identity in ["alice", "bob", "carol"] {
		let client = Arc::clone(&client);

		tasks.spawn(async move {
			client.search(identity, "q", &Namespace::Global, None, 10, None).await
		});
	}

	while let Some(joined) = tasks.join_next().await {
		joined.expect("task").expect("search");
	}

	assert_eq!(graph.peak_in_flight(), 3);
	assert_eq!(client.metrics().identity_limiters, 3);
}

#[tokio::test]
async fn search_timeout_degrades_to_empty() {
	let graph = MemoryGraph::new()
		.with_results(Namespace::Global, vec![result("g", 0.5)])
		.with_search_delay(Namespace::Global, Duration::from_millis(300));
	let client = test_client(
		&graph,
		ClientLimits { search_timeout: Duration::from_millis(50), ..limits() },
		EngineCapabilities::default(),
	);
	let results =
		client.search("alice", "q", &Namespace::Global, None, 10, None).await.expect("search");
	let metrics = client.metrics();

	assert!(results.is_empty());
	assert_eq!(metrics.timeouts, 1);
	assert_eq!(metrics.failed_requests, 1);
	assert_eq!(metrics.active_requests, 0);
}

#[tokio::test]
async fn lookup_timeout_is_an_error() {
	let graph = MemoryGraph::new().with_neighbor_delay(Duration::from_millis(300));
	let client = test_client(
		&graph,
		ClientLimits { search_timeout: Duration::from_millis(50), ..limits() },
		EngineCapabilities::default(),
	);

	assert!(matches!(
		client.get_edges_for_node("alice", "n1", None).await,
		Err(Error::Timeout { .. })
	));
}

#[tokio::test]
async fn engine_errors_propagate_from_search() {
	let graph = MemoryGraph::new().failing(Namespace::Global);
	let client = test_client(&graph, limits(), EngineCapabilities::default());

	assert!(matches!(
		client.search("alice", "q", &Namespace::Global, None, 10, None).await,
		Err(Error::Engine { .. })
	));
	assert_eq!(client.metrics().failed_requests, 1);
}

#[tokio::test]
async fn slow_queries_are_counted() {
	let graph = MemoryGraph::new().with_search_delay(Namespace::Global, Duration::from_millis(60));
	let client = test_client(
		&graph,
		ClientLimits { slow_query: Duration::from_millis(10), ..limits() },
		EngineCapabilities::default(),
	);

	client.search("alice", "q", &Namespace::Global, None, 10, None).await.expect("search");

	assert_eq!(client.metrics().slow_queries, 1);
}

#[tokio::test]
async fn metrics_rank_busiest_identities() {
	let graph = MemoryGraph::new();
	let client = test_client(&graph, limits(), EngineCapabilities::default());

	for identity in ["bob", "alice", "bob", "carol", "bob", "alice"] {
		client.search(identity, "q", &Namespace::Global, None, 10, None).await.expect("search");
	}

	let metrics = client.metrics();
	let top = metrics
		.top_identities
		.iter()
		.map(|i| (i.identity.as_str(), i.requests))
		.collect::<Vec<_>>();

	assert_eq!(metrics.total_requests, 6);
	assert_eq!(top, vec![("bob", 3), ("alice", 2), ("carol", 1)]);

	let stats = client.identity_stats("alice");

	assert_eq!(stats.requests, 2);
	assert!(stats.has_limiter);
	assert!(!client.identity_stats("dave").has_limiter);
}

#[tokio::test]
async fn close_drains_in_flight_calls_and_rejects_new_ones() {
	let graph = MemoryGraph::new()
		.with_results(Namespace::Global, vec![result("g", 0.5)])
		.with_search_delay(Namespace::Global, Duration::from_millis(100));
	let client = test_client(&graph, limits(), EngineCapabilities::default());

	client.init().await.expect("init");

	let in_flight = {
		let client = Arc::clone(&client);

		tokio::spawn(async move {
			client.search("alice", "q", &Namespace::Global, None, 10, None).await
		})
	};

	tokio::time::sleep(Duration::from_millis(20)).await;
	client.close().await;

	assert_eq!(in_flight.await.expect("task").expect("search").len(), 1);
	assert!(graph.is_closed());
	assert!(matches!(
		client.search("alice", "q", &Namespace::Global, None, 10, None).await,
		Err(Error::Engine { .. })
	));
}

#[tokio::test]
async fn community_rebuild_honors_filter_capability() {
	let alice = user("alice").expect("namespace");
	let filtering = MemoryGraph::new();
	let client = test_client(
		&filtering,
		limits(),
		EngineCapabilities { community_group_ids: true, ..EngineCapabilities::default() },
	);

	client.rebuild_communities(&[alice.clone()]).await;

	assert_eq!(filtering.community_builds(), vec![Some(vec![alice.clone()])]);

	let unfiltered = MemoryGraph::new();
	let client = test_client(&unfiltered, limits(), EngineCapabilities::default());

	client.rebuild_communities(&[alice]).await;

	assert_eq!(unfiltered.community_builds(), vec![None]);
}

#[tokio::test]
async fn search_caps_oversized_engine_pages() {
	let graph = MemoryGraph::new()
		.with_results(
			Namespace::Global,
			(0..8).map(|i| result(&format!("g{i}"), 0.9 - i as f32 * 0.05)).collect(),
		)
		.ignoring_limits();
	let client = test_client(&graph, limits(), EngineCapabilities::default());
	let results =
		client.search("alice", "q", &Namespace::Global, None, 3, None).await.expect("search");

	assert_eq!(results.iter().map(|r| r.uuid.as_str()).collect::<Vec<_>>(), vec!["g0", "g1", "g2"]);
}

#[tokio::test]
async fn community_rebuild_does_not_share_a_user_limiter() {
	let graph = MemoryGraph::new();
	let client = test_client(&graph, limits(), EngineCapabilities::default());

	client.rebuild_communities(&[]).await;

	assert_eq!(graph.community_builds(), vec![None]);
	assert!(!client.identity_stats("anonymous").has_limiter);
	assert!(!client.identity_stats("system").has_limiter);
}
