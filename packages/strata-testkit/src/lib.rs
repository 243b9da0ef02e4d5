//! In-memory graph engine and fake providers for exercising `strata-service` without a network.

mod error;

pub use error::{Error, Result};

use std::{
	collections::{HashMap, HashSet},
	sync::{
		Arc, Mutex, PoisonError,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use color_eyre::eyre;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::time as clock;

use strata_config::{Config, ProviderConfig};
use strata_domain::{
	Namespace, NodeType, RawDegree, RawEdge, RawEpisode, RawGraphStats, RawNeighbor, RawNode,
	RawPath, RawResult, RawSubgraph, Receipt, namespace,
};
use strata_service::{
	BoxFuture, ClientLimits, EngineCapabilities, GraphClient, GraphConnector, GraphEngine,
	Providers, RerankProvider, StrataService,
};

pub const MENTIONS: &str = "MENTIONS";

pub const TEST_CONFIG: &str = r#"
[service]
http_bind  = "127.0.0.1:0"
admin_bind = "127.0.0.1:0"

[graph]
api_base = "http://127.0.0.1:8000"

[providers.rerank]
provider_id = "test"
api_base    = "http://127.0.0.1:8001"
api_key     = "test-key"
path        = "/v1/rerank"
model       = "test-cross-encoder"
timeout_ms  = 1000
"#;

/// One recorded engine search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
	pub namespace: Namespace,
	pub limit: u32,
	pub focal_node: Option<String>,
}

#[derive(Default)]
struct GraphState {
	results: HashMap<Namespace, Vec<RawResult>>,
	nodes: HashMap<String, RawNode>,
	edges: Vec<RawEdge>,
	paths: Vec<RawPath>,
	failing: HashSet<Namespace>,
	search_delays: HashMap<Namespace, Duration>,
	searches: Vec<SearchCall>,
	episodes: Vec<(Namespace, String)>,
	community_builds: Vec<Option<Vec<Namespace>>>,
	neighbor_lookups: usize,
}

/// A scriptable graph engine. Results are keyed by namespace; nodes and edges form one graph.
#[derive(Default)]
pub struct MemoryGraph {
	state: Mutex<GraphState>,
	neighbor_delay: Mutex<Option<Duration>>,
	fail_neighbors: AtomicBool,
	ignore_limits: AtomicBool,
	fail_connects: AtomicUsize,
	connect_delay: Mutex<Option<Duration>>,
	connects: AtomicUsize,
	in_flight: AtomicUsize,
	peak_in_flight: AtomicUsize,
	closed: AtomicBool,
}
impl MemoryGraph {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with_results(self: Arc<Self>, namespace: Namespace, results: Vec<RawResult>) -> Arc<Self> {
		self.state().results.insert(namespace, results);

		self
	}

	pub fn with_node(self: Arc<Self>, node: RawNode) -> Arc<Self> {
		self.state().nodes.insert(node.uuid.clone(), node);

		self
	}

	pub fn with_edge(self: Arc<Self>, edge: RawEdge) -> Arc<Self> {
		self.state().edges.push(edge);

		self
	}

	/// Paths returned verbatim by the native path query.
	pub fn with_paths(self: Arc<Self>, paths: Vec<RawPath>) -> Arc<Self> {
		self.state().paths = paths;

		self
	}

	pub fn failing(self: Arc<Self>, namespace: Namespace) -> Arc<Self> {
		self.state().failing.insert(namespace);

		self
	}

	pub fn with_search_delay(self: Arc<Self>, namespace: Namespace, delay: Duration) -> Arc<Self> {
		self.state().search_delays.insert(namespace, delay);

		self
	}

	pub fn with_neighbor_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
		*self.neighbor_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);

		self
	}

	/// Searches return every stored result regardless of the requested limit.
	pub fn ignoring_limits(self: Arc<Self>) -> Arc<Self> {
		self.ignore_limits.store(true, Ordering::SeqCst);

		self
	}

	pub fn with_failing_neighbors(self: Arc<Self>) -> Arc<Self> {
		self.fail_neighbors.store(true, Ordering::SeqCst);

		self
	}

	/// The next `attempts` connection attempts fail.
	pub fn with_failing_connects(self: Arc<Self>, attempts: usize) -> Arc<Self> {
		self.fail_connects.store(attempts, Ordering::SeqCst);

		self
	}

	pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
		*self.connect_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);

		self
	}

	pub fn connector(self: &Arc<Self>) -> Arc<dyn GraphConnector> {
		Arc::new(MemoryConnector { graph: Arc::clone(self) })
	}

	pub fn searches(&self) -> Vec<SearchCall> {
		self.state().searches.clone()
	}

	pub fn searched_namespaces(&self) -> Vec<Namespace> {
		self.state().searches.iter().map(|call| call.namespace.clone()).collect()
	}

	pub fn episodes(&self) -> Vec<(Namespace, String)> {
		self.state().episodes.clone()
	}

	pub fn community_builds(&self) -> Vec<Option<Vec<Namespace>>> {
		self.state().community_builds.clone()
	}

	pub fn neighbor_lookups(&self) -> usize {
		self.state().neighbor_lookups
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn peak_in_flight(&self) -> usize {
		self.peak_in_flight.load(Ordering::SeqCst)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn state(&self) -> std::sync::MutexGuard<'_, GraphState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn enter(&self) -> InFlight<'_> {
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

		InFlight { graph: self }
	}

	fn neighbors_of(&self, uuid: &str) -> Vec<RawNeighbor> {
		let state = self.state();

		state
			.edges
			.iter()
			.filter_map(|edge| {
				let (other, direction) = edge.other_end(uuid)?;
				let node = state.nodes.get(other)?;

				Some(RawNeighbor { node: node.clone(), edge: edge.clone(), direction })
			})
			.collect()
	}
}

struct InFlight<'a> {
	graph: &'a MemoryGraph,
}
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.graph.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

struct MemoryConnector {
	graph: Arc<MemoryGraph>,
}

/// Scores documents from a fixed table; unknown documents score zero.
pub struct StaticRerank {
	scores: HashMap<String, f32>,
	delay: Option<Duration>,
}
impl StaticRerank {
	pub fn new<I, S>(scores: I) -> Self
	where
		I: IntoIterator<Item = (S, f32)>,
		S: Into<String>,
	{
		Self {
			scores: scores.into_iter().map(|(doc, score)| (doc.into(), score)).collect(),
			delay: None,
		}
	}

	/// Sleeps for `delay` before answering.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);

		self
	}
}

pub struct FailingRerank;

impl GraphEngine for MemoryGraph {
	fn search<'a>(
		&'a self,
		_query: &'a str,
		namespace: &'a Namespace,
		focal_node: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, eyre::Result<Vec<RawResult>>> {
		Box::pin(async move {
			let _in_flight = self.enter();
			let (delay, failing) = {
				let mut state = self.state();

				state.searches.push(SearchCall {
					namespace: namespace.clone(),
					limit,
					focal_node: focal_node.map(ToString::to_string),
				});

				(state.search_delays.get(namespace).copied(), state.failing.contains(namespace))
			};

			if let Some(delay) = delay {
				clock::sleep(delay).await;
			}
			if failing {
				return Err(eyre::eyre!("Namespace {namespace} is unavailable."));
			}

			let results = self.state().results.get(namespace).cloned().unwrap_or_default();

			if self.ignore_limits.load(Ordering::SeqCst) {
				return Ok(results);
			}

			Ok(results.into_iter().take(limit as usize).collect())
		})
	}

	fn get_node<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, eyre::Result<Option<RawNode>>> {
		Box::pin(async move { Ok(self.state().nodes.get(uuid).cloned()) })
	}

	fn get_edge<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, eyre::Result<Option<RawEdge>>> {
		Box::pin(async move { Ok(self.state().edges.iter().find(|edge| edge.uuid == uuid).cloned()) })
	}

	fn get_neighbors<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, eyre::Result<Vec<RawNeighbor>>> {
		Box::pin(async move {
			self.state().neighbor_lookups += 1;

			let delay = *self.neighbor_delay.lock().unwrap_or_else(PoisonError::into_inner);

			if let Some(delay) = delay {
				clock::sleep(delay).await;
			}
			if self.fail_neighbors.load(Ordering::SeqCst) {
				return Err(eyre::eyre!("Neighbor lookup failed for {uuid}."));
			}

			Ok(self.neighbors_of(uuid))
		})
	}

	fn shortest_paths<'a>(
		&'a self,
		source: &'a str,
		target: &'a str,
		max_depth: u32,
		limit: u32,
	) -> BoxFuture<'a, eyre::Result<Vec<RawPath>>> {
		Box::pin(async move {
			let paths = self
				.state()
				.paths
				.iter()
				.filter(|path| {
					path.len() <= max_depth as usize
						&& path.nodes.first().is_some_and(|node| node.uuid == source)
						&& path.nodes.last().is_some_and(|node| node.uuid == target)
				})
				.take(limit as usize)
				.cloned()
				.collect();

			Ok(paths)
		})
	}

	fn namespace_graph<'a>(
		&'a self,
		namespace: &'a Namespace,
		node_types: &'a [NodeType],
		limit: u32,
	) -> BoxFuture<'a, eyre::Result<RawSubgraph>> {
		Box::pin(async move {
			let state = self.state();
			let mut nodes = state
				.nodes
				.values()
				.filter(|node| node.namespace == *namespace && node_types.contains(&node.node_type))
				.cloned()
				.collect::<Vec<_>>();

			nodes.sort_by(|a, b| a.uuid.cmp(&b.uuid));
			nodes.truncate(limit as usize);

			let kept = nodes.iter().map(|node| node.uuid.as_str()).collect::<HashSet<_>>();
			let edges = state
				.edges
				.iter()
				.filter(|edge| {
					kept.contains(edge.source_uuid.as_str()) && kept.contains(edge.target_uuid.as_str())
				})
				.cloned()
				.collect();

			Ok(RawSubgraph { nodes, edges })
		})
	}

	fn namespace_stats<'a>(
		&'a self,
		namespace: &'a Namespace,
		since: OffsetDateTime,
		top: u32,
	) -> BoxFuture<'a, eyre::Result<RawGraphStats>> {
		Box::pin(async move {
			let state = self.state();
			let members = state
				.nodes
				.values()
				.filter(|node| node.namespace == *namespace)
				.collect::<Vec<_>>();
			let member_ids = members.iter().map(|node| node.uuid.as_str()).collect::<HashSet<_>>();
			let internal = state
				.edges
				.iter()
				.filter(|edge| {
					member_ids.contains(edge.source_uuid.as_str())
						&& member_ids.contains(edge.target_uuid.as_str())
				})
				.collect::<Vec<_>>();
			let mut stats = RawGraphStats {
				edge_count: internal.len() as u64,
				recent_edges: internal
					.iter()
					.filter(|edge| edge.created_at.is_some_and(|at| at > since))
					.count() as u64,
				..RawGraphStats::default()
			};

			for node in &members {
				match node.node_type {
					NodeType::Entity => stats.entity_count += 1,
					NodeType::Episode => stats.episode_count += 1,
					NodeType::Community => stats.community_count += 1,
				}

				if node.created_at.is_some_and(|at| at > since) {
					stats.recent_nodes += 1;
				}
				if node.node_type == NodeType::Entity
					&& let Some(domain) = node.properties.get("domain").and_then(Value::as_str)
				{
					*stats.entity_domains.entry(domain.to_string()).or_default() += 1;
				}
			}

			let mut degrees = members
				.iter()
				.filter(|node| node.node_type == NodeType::Entity)
				.map(|node| RawDegree {
					uuid: node.uuid.clone(),
					name: node.name.clone(),
					degree: state.edges.iter().filter(|edge| edge.other_end(&node.uuid).is_some()).count()
						as u64,
				})
				.filter(|entity| entity.degree > 0)
				.collect::<Vec<_>>();

			degrees.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.uuid.cmp(&b.uuid)));
			degrees.truncate(top as usize);

			stats.top_entities = degrees;

			Ok(stats)
		})
	}

	/// Episodes are episode nodes with a `MENTIONS` edge to the entity; the summary is the body.
	fn source_episodes<'a>(
		&'a self,
		uuid: &'a str,
		namespace: &'a Namespace,
		limit: u32,
	) -> BoxFuture<'a, eyre::Result<Vec<RawEpisode>>> {
		Box::pin(async move {
			let state = self.state();
			let mut episodes = state
				.edges
				.iter()
				.filter(|edge| edge.relation_type == MENTIONS && edge.target_uuid == uuid)
				.filter_map(|edge| state.nodes.get(&edge.source_uuid))
				.filter(|node| node.node_type == NodeType::Episode && node.namespace == *namespace)
				.map(|node| RawEpisode {
					uuid: node.uuid.clone(),
					namespace: node.namespace.clone(),
					content: node.summary.clone().unwrap_or_default(),
					created_at: node.created_at,
				})
				.collect::<Vec<_>>();

			episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
			episodes.truncate(limit as usize);

			Ok(episodes)
		})
	}

	fn add_content<'a>(
		&'a self,
		content: &'a str,
		namespace: &'a Namespace,
		_metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, eyre::Result<Receipt>> {
		Box::pin(async move {
			let mut state = self.state();

			state.episodes.push((namespace.clone(), content.to_string()));

			Ok(Receipt {
				episode_uuid: format!("episode-{}", state.episodes.len()),
				namespace: namespace.clone(),
				node_count: 1,
				edge_count: 0,
			})
		})
	}

	fn build_communities<'a>(
		&'a self,
		namespaces: Option<&'a [Namespace]>,
	) -> BoxFuture<'a, eyre::Result<()>> {
		Box::pin(async move {
			self.state().community_builds.push(namespaces.map(<[Namespace]>::to_vec));

			Ok(())
		})
	}

	fn close<'a>(&'a self) -> BoxFuture<'a, eyre::Result<()>> {
		Box::pin(async move {
			self.closed.store(true, Ordering::SeqCst);

			Ok(())
		})
	}
}

impl GraphConnector for MemoryConnector {
	fn connect<'a>(&'a self) -> BoxFuture<'a, eyre::Result<Arc<dyn GraphEngine>>> {
		Box::pin(async move {
			self.graph.connects.fetch_add(1, Ordering::SeqCst);

			let delay = *self.graph.connect_delay.lock().unwrap_or_else(PoisonError::into_inner);

			if let Some(delay) = delay {
				clock::sleep(delay).await;
			}

			let should_fail = self
				.graph
				.fail_connects
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok();

			if should_fail {
				return Err(eyre::eyre!("Graph engine refused the connection."));
			}

			Ok(Arc::clone(&self.graph) as Arc<dyn GraphEngine>)
		})
	}
}

impl RerankProvider for StaticRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, eyre::Result<Vec<f32>>> {
		Box::pin(async move {
			if let Some(delay) = self.delay {
				clock::sleep(delay).await;
			}

			Ok(docs.iter().map(|doc| self.scores.get(doc).copied().unwrap_or(0.0)).collect())
		})
	}
}

impl RerankProvider for FailingRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		_docs: &'a [String],
	) -> BoxFuture<'a, eyre::Result<Vec<f32>>> {
		Box::pin(async { Err(eyre::eyre!("Cross-encoder unavailable.")) })
	}
}

pub fn test_config() -> Result<Config> {
	Ok(strata_config::from_toml_str(TEST_CONFIG)?)
}

pub fn test_client(
	graph: &Arc<MemoryGraph>,
	limits: ClientLimits,
	capabilities: EngineCapabilities,
) -> Arc<GraphClient> {
	Arc::new(GraphClient::new(graph.connector(), limits, capabilities))
}

/// A service over `graph` with default limits and the given rerank provider.
pub fn test_service(
	graph: &Arc<MemoryGraph>,
	rerank: Option<Arc<dyn RerankProvider>>,
) -> Result<Arc<StrataService>> {
	test_service_with(graph, ClientLimits::default(), EngineCapabilities::default(), rerank)
}

pub fn test_service_with(
	graph: &Arc<MemoryGraph>,
	limits: ClientLimits,
	capabilities: EngineCapabilities,
	rerank: Option<Arc<dyn RerankProvider>>,
) -> Result<Arc<StrataService>> {
	let cfg = test_config()?;
	let client = test_client(graph, limits, capabilities);
	let providers = rerank.map(Providers::new).unwrap_or_else(|| Providers::new(Arc::new(FailingRerank)));

	Ok(Arc::new(StrataService::with_providers(&cfg, client, providers)))
}

pub fn user(identity: &str) -> Result<Namespace> {
	namespace::user_namespace(identity).map_err(|err| Error::Message(err.to_string()))
}

pub fn node(uuid: &str, namespace: Namespace) -> RawNode {
	RawNode::new(uuid, format!("Node {uuid}"), namespace)
}

/// An episode node whose summary carries the episode body.
pub fn episode(uuid: &str, namespace: Namespace, content: &str, created_at: OffsetDateTime) -> RawNode {
	let mut node = RawNode::new(uuid, format!("Episode {uuid}"), namespace);

	node.node_type = NodeType::Episode;
	node.summary = Some(content.to_string());
	node.created_at = Some(created_at);

	node
}

pub fn edge(uuid: &str, relation_type: &str, source: &str, target: &str) -> RawEdge {
	RawEdge::new(uuid, relation_type, source, target)
}

pub fn result(uuid: &str, score: f32) -> RawResult {
	RawResult::new(uuid, format!("Result {uuid}"), score)
}
