//! Resource-governed access to the graph engine.
//!
//! Every engine call goes through [`GraphClient`]: the connection is opened lazily and exactly
//! once, each identity gets a bounded number of in-flight calls, and every call runs under a
//! deadline. Search-like reads degrade to empty results when the deadline passes; writes and
//! single-entity lookups report a [`Error::Timeout`].

use std::{
	collections::HashMap,
	future::Future,
	sync::{
		Arc, Mutex, PoisonError,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, Value};
use ::time::OffsetDateTime;
use tokio::{
	sync::{OnceCell, Semaphore},
	time::{self, Instant},
};

use crate::{Error, GraphConnector, GraphEngine, Result};
use strata_domain::{
	Namespace, NodeType, RawEdge, RawEpisode, RawGraphStats, RawNeighbor, RawNode, RawPath,
	RawResult, RawSubgraph, Receipt,
};

/// Limiter key for unauthenticated calls. The separator makes it unreachable as an identity.
pub(crate) const ANONYMOUS: &str = ":anonymous";
/// Limiter key for maintenance work the service starts on its own.
pub(crate) const SYSTEM: &str = ":system";

const TOP_IDENTITIES: usize = 10;
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientLimits {
	pub search_timeout: Duration,
	pub add_timeout: Duration,
	pub max_concurrency_per_identity: usize,
	pub slow_query: Duration,
	pub drain_timeout: Duration,
}
impl ClientLimits {
	pub fn from_config(cfg: &strata_config::Graph) -> Self {
		Self {
			search_timeout: Duration::from_millis(cfg.search_timeout_ms),
			add_timeout: Duration::from_millis(cfg.add_timeout_ms),
			max_concurrency_per_identity: cfg.max_concurrency_per_identity.max(1),
			slow_query: Duration::from_millis(cfg.slow_query_ms),
			drain_timeout: Duration::from_millis(cfg.drain_timeout_ms),
		}
	}
}
impl Default for ClientLimits {
	fn default() -> Self {
		Self {
			search_timeout: Duration::from_secs(10),
			add_timeout: Duration::from_secs(300),
			max_concurrency_per_identity: 5,
			slow_query: Duration::from_secs(3),
			drain_timeout: Duration::from_secs(10),
		}
	}
}

/// Optional engine features, declared up front instead of probed at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
	pub native_paths: bool,
	pub community_group_ids: bool,
}
impl EngineCapabilities {
	pub fn from_config(cfg: &strata_config::Graph) -> Self {
		Self { native_paths: cfg.native_paths, community_group_ids: cfg.community_group_ids }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdentityRequests {
	pub identity: String,
	pub requests: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdentityStats {
	pub identity: String,
	pub requests: u64,
	pub has_limiter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientMetrics {
	pub total_requests: u64,
	pub active_requests: u64,
	pub successful_requests: u64,
	pub failed_requests: u64,
	pub timeouts: u64,
	pub slow_queries: u64,
	pub identity_limiters: usize,
	pub top_identities: Vec<IdentityRequests>,
}

pub struct GraphClient {
	connector: Arc<dyn GraphConnector>,
	engine: OnceCell<Arc<dyn GraphEngine>>,
	limits: ClientLimits,
	capabilities: EngineCapabilities,
	limiters: Mutex<HashMap<String, Arc<Semaphore>>>,
	counters: Counters,
	closed: AtomicBool,
}
impl GraphClient {
	pub fn new(
		connector: Arc<dyn GraphConnector>,
		limits: ClientLimits,
		capabilities: EngineCapabilities,
	) -> Self {
		Self {
			connector,
			engine: OnceCell::new(),
			limits,
			capabilities,
			limiters: Mutex::new(HashMap::new()),
			counters: Counters::default(),
			closed: AtomicBool::new(false),
		}
	}

	pub fn from_config(cfg: &strata_config::Graph, connector: Arc<dyn GraphConnector>) -> Self {
		Self::new(connector, ClientLimits::from_config(cfg), EngineCapabilities::from_config(cfg))
	}

	pub fn limits(&self) -> ClientLimits {
		self.limits
	}

	pub fn capabilities(&self) -> EngineCapabilities {
		self.capabilities
	}

	/// Opens the engine connection. Concurrent and repeated calls share one connection attempt.
	pub async fn init(&self) -> Result<()> {
		self.engine().await.map(|_| ())
	}

	pub fn is_initialized(&self) -> bool {
		self.engine.initialized()
	}

	/// Namespace-scoped search. A missed deadline yields no results rather than an error.
	pub async fn search(
		&self,
		identity: &str,
		query: &str,
		namespace: &Namespace,
		focal_node: Option<&str>,
		limit: u32,
		deadline: Option<Instant>,
	) -> Result<Vec<RawResult>> {
		let engine = self.engine().await?;
		let call = self.run(
			identity,
			"search",
			self.limits.search_timeout,
			deadline,
			engine.search(query, namespace, focal_node, limit),
		);

		match call.await {
			Ok(mut results) => {
				results.truncate(limit as usize);

				Ok(results)
			},
			Err(Error::Timeout { timeout_ms, .. }) => {
				tracing::error!(
					identity,
					namespace = %namespace,
					timeout_ms,
					"Graph search timed out. Returning no results."
				);

				Ok(Vec::new())
			},
			Err(err) => Err(err),
		}
	}

	pub async fn get_node(
		&self,
		identity: &str,
		uuid: &str,
		deadline: Option<Instant>,
	) -> Result<Option<RawNode>> {
		let engine = self.engine().await?;

		self.run(identity, "node lookup", self.limits.search_timeout, deadline, engine.get_node(uuid))
			.await
	}

	pub async fn get_edge(
		&self,
		identity: &str,
		uuid: &str,
		deadline: Option<Instant>,
	) -> Result<Option<RawEdge>> {
		let engine = self.engine().await?;

		self.run(identity, "edge lookup", self.limits.search_timeout, deadline, engine.get_edge(uuid))
			.await
	}

	/// Edges incident to `uuid` paired with the node on the far side.
	pub async fn get_edges_for_node(
		&self,
		identity: &str,
		uuid: &str,
		deadline: Option<Instant>,
	) -> Result<Vec<RawNeighbor>> {
		let engine = self.engine().await?;

		self.run(
			identity,
			"neighbor lookup",
			self.limits.search_timeout,
			deadline,
			engine.get_neighbors(uuid),
		)
		.await
	}

	pub async fn namespace_graph(
		&self,
		identity: &str,
		namespace: &Namespace,
		node_types: &[NodeType],
		limit: u32,
	) -> Result<RawSubgraph> {
		let engine = self.engine().await?;

		self.run(
			identity,
			"graph export",
			self.limits.search_timeout,
			None,
			engine.namespace_graph(namespace, node_types, limit),
		)
		.await
	}

	pub async fn namespace_stats(
		&self,
		identity: &str,
		namespace: &Namespace,
		since: OffsetDateTime,
		top: u32,
	) -> Result<RawGraphStats> {
		let engine = self.engine().await?;

		self.run(
			identity,
			"graph statistics",
			self.limits.search_timeout,
			None,
			engine.namespace_stats(namespace, since, top),
		)
		.await
	}

	pub async fn source_episodes(
		&self,
		identity: &str,
		uuid: &str,
		namespace: &Namespace,
		limit: u32,
	) -> Result<Vec<RawEpisode>> {
		let engine = self.engine().await?;

		self.run(
			identity,
			"episode lookup",
			self.limits.search_timeout,
			None,
			engine.source_episodes(uuid, namespace, limit),
		)
		.await
	}

	/// Engine-native shortest paths. A missed deadline yields no paths rather than an error.
	pub async fn find_shortest_paths(
		&self,
		identity: &str,
		source: &str,
		target: &str,
		max_depth: u32,
		limit: u32,
		deadline: Option<Instant>,
	) -> Result<Vec<RawPath>> {
		let engine = self.engine().await?;
		let call = self.run(
			identity,
			"path search",
			self.limits.search_timeout,
			deadline,
			engine.shortest_paths(source, target, max_depth, limit),
		);

		match call.await {
			Err(Error::Timeout { timeout_ms, .. }) => {
				tracing::error!(identity, source, target, timeout_ms, "Graph path search timed out.");

				Ok(Vec::new())
			},
			other => other,
		}
	}

	pub async fn add_content(
		&self,
		identity: &str,
		content: &str,
		namespace: &Namespace,
		metadata: &Map<String, Value>,
	) -> Result<Receipt> {
		let engine = self.engine().await?;

		self.run(
			identity,
			"add content",
			self.limits.add_timeout,
			None,
			engine.add_content(content, namespace, metadata),
		)
		.await
	}

	/// Best effort: failures are logged and swallowed.
	pub async fn rebuild_communities(&self, namespaces: &[Namespace]) {
		let engine = match self.engine().await {
			Ok(engine) => engine,
			Err(err) => {
				tracing::warn!(error = %err, "Community rebuild skipped. Graph engine unavailable.");

				return;
			},
		};
		let filter = if self.capabilities.community_group_ids && !namespaces.is_empty() {
			Some(namespaces)
		} else {
			if !namespaces.is_empty() {
				tracing::debug!(
					namespaces = namespaces.len(),
					"Engine cannot filter community builds. Rebuilding every namespace."
				);
			}

			None
		};
		let call = self.run(
			SYSTEM,
			"community rebuild",
			self.limits.add_timeout,
			None,
			engine.build_communities(filter),
		);

		match call.await {
			Ok(()) => tracing::info!(namespaces = namespaces.len(), "Communities rebuilt."),
			Err(err) => tracing::warn!(error = %err, "Community rebuild failed."),
		}
	}

	pub fn metrics(&self) -> ClientMetrics {
		let limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner).len();
		let mut top_identities = self
			.counters
			.per_identity
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.map(|(identity, requests)| IdentityRequests {
				identity: identity.clone(),
				requests: *requests,
			})
			.collect::<Vec<_>>();

		top_identities
			.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.identity.cmp(&b.identity)));
		top_identities.truncate(TOP_IDENTITIES);

		ClientMetrics {
			total_requests: self.counters.total.load(Ordering::Relaxed),
			active_requests: self.counters.active.load(Ordering::Relaxed),
			successful_requests: self.counters.successful.load(Ordering::Relaxed),
			failed_requests: self.counters.failed.load(Ordering::Relaxed),
			timeouts: self.counters.timeouts.load(Ordering::Relaxed),
			slow_queries: self.counters.slow.load(Ordering::Relaxed),
			identity_limiters: limiters,
			top_identities,
		}
	}

	pub fn identity_stats(&self, identity: &str) -> IdentityStats {
		let requests = self
			.counters
			.per_identity
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(identity)
			.copied()
			.unwrap_or(0);
		let has_limiter =
			self.limiters.lock().unwrap_or_else(PoisonError::into_inner).contains_key(identity);

		IdentityStats { identity: identity.to_string(), requests, has_limiter }
	}

	/// Stops accepting calls, waits for in-flight calls to drain, then releases the engine.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let drain_deadline = Instant::now() + self.limits.drain_timeout;

		while self.counters.active.load(Ordering::SeqCst) > 0 {
			if Instant::now() >= drain_deadline {
				tracing::warn!(
					active = self.counters.active.load(Ordering::SeqCst),
					"Graph client drain timed out. Closing with calls in flight."
				);

				break;
			}

			time::sleep(DRAIN_POLL).await;
		}

		if let Some(engine) = self.engine.get()
			&& let Err(err) = engine.close().await
		{
			tracing::warn!(error = %err, "Failed to close graph engine.");
		}

		let metrics = self.metrics();

		tracing::info!(
			total = metrics.total_requests,
			successful = metrics.successful_requests,
			failed = metrics.failed_requests,
			timeouts = metrics.timeouts,
			slow = metrics.slow_queries,
			"Graph client closed."
		);
	}

	async fn engine(&self) -> Result<&Arc<dyn GraphEngine>> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::Engine { message: "Graph client is closed.".to_string() });
		}

		self.engine
			.get_or_try_init(|| async {
				let engine = self.connector.connect().await?;

				tracing::info!("Graph engine initialized.");

				Ok::<_, Error>(engine)
			})
			.await
	}

	fn limiter(&self, identity: &str) -> Arc<Semaphore> {
		let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);

		limiters
			.entry(identity.to_string())
			.or_insert_with(|| Arc::new(Semaphore::new(self.limits.max_concurrency_per_identity)))
			.clone()
	}

	/// Runs one engine call under the identity's concurrency slot and the tighter of the
	/// operation timeout and the caller's deadline. Waiting for a slot counts against the deadline.
	async fn run<T, F>(
		&self,
		identity: &str,
		operation: &'static str,
		timeout: Duration,
		deadline: Option<Instant>,
		call: F,
	) -> Result<T>
	where
		F: Future<Output = color_eyre::Result<T>>,
	{
		let started = Instant::now();
		let op_deadline = started + timeout;
		let deadline = deadline.map_or(op_deadline, |deadline| deadline.min(op_deadline));
		let limiter = self.limiter(identity);
		let _active = self.counters.begin(identity);
		let outcome = time::timeout_at(deadline, async {
			let _permit = limiter
				.acquire_owned()
				.await
				.map_err(|_| Error::Engine { message: "Concurrency limiter closed.".to_string() })?;

			call.await.map_err(Error::from)
		})
		.await;
		let elapsed = started.elapsed();

		if elapsed > self.limits.slow_query {
			self.counters.slow.fetch_add(1, Ordering::Relaxed);

			tracing::warn!(
				identity,
				operation,
				elapsed_ms = elapsed.as_millis() as u64,
				"Slow graph query."
			);
		}

		match outcome {
			Ok(Ok(value)) => {
				self.counters.successful.fetch_add(1, Ordering::Relaxed);

				Ok(value)
			},
			Ok(Err(err)) => {
				self.counters.failed.fetch_add(1, Ordering::Relaxed);

				tracing::warn!(error = %err, identity, operation, "Graph engine call failed.");

				Err(err)
			},
			Err(_) => {
				self.counters.failed.fetch_add(1, Ordering::Relaxed);
				self.counters.timeouts.fetch_add(1, Ordering::Relaxed);

				let timeout_ms = deadline.saturating_duration_since(started).as_millis() as u64;

				Err(Error::Timeout { operation, timeout_ms })
			},
		}
	}
}

#[derive(Default)]
struct Counters {
	total: AtomicU64,
	active: AtomicU64,
	successful: AtomicU64,
	failed: AtomicU64,
	timeouts: AtomicU64,
	slow: AtomicU64,
	per_identity: Mutex<HashMap<String, u64>>,
}
impl Counters {
	fn begin(&self, identity: &str) -> ActiveCall<'_> {
		self.total.fetch_add(1, Ordering::Relaxed);
		self.active.fetch_add(1, Ordering::SeqCst);

		*self
			.per_identity
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(identity.to_string())
			.or_default() += 1;

		ActiveCall { active: &self.active }
	}
}

/// Keeps the in-flight gauge accurate when a call is cancelled mid-await.
struct ActiveCall<'a> {
	active: &'a AtomicU64,
}
impl Drop for ActiveCall<'_> {
	fn drop(&mut self) {
		self.active.fetch_sub(1, Ordering::SeqCst);
	}
}
