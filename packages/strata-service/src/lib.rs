pub mod client;
pub mod graph;
pub mod ingest;
pub mod paths;
pub mod search;

mod error;

pub use client::{
	ClientLimits, ClientMetrics, EngineCapabilities, GraphClient, IdentityRequests, IdentityStats,
};
pub use error::{Error, Result};
pub use graph::{
	EdgeDetail, GraphEdge, GraphExportQuery, GraphGrowth, GraphNode, GraphStats, NamespaceGraph,
	Neighbor, NeighborDirection, NeighborQuery, NeighborSet, NodeDetail, NodeDetailOptions,
	NodeRef, NodeTypeCounts, SourceEpisode, TopEntity,
};
pub use ingest::{AddContentRequest, AddContentResponse};
pub use paths::{GraphPath, PathEdge, PathRequest, PathSet};
pub use search::{RerankMode, SearchRequest, SearchResponse, SearchResult};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::{Map, Value};
use time::OffsetDateTime;

use strata_config::{Config, ProviderConfig};
use strata_domain::{
	Namespace, NodeType, RawEdge, RawEpisode, RawGraphStats, RawNeighbor, RawNode, RawPath,
	RawResult, RawSubgraph, Receipt,
};
use strata_providers::{graph::HttpGraphEngine, rerank};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Operations every graph engine backend provides.
///
/// Implementations return strict domain shapes; engine-specific payloads never cross this seam.
pub trait GraphEngine
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		query: &'a str,
		namespace: &'a Namespace,
		focal_node: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawResult>>>;

	fn get_node<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, color_eyre::Result<Option<RawNode>>>;

	fn get_edge<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, color_eyre::Result<Option<RawEdge>>>;

	fn get_neighbors<'a>(
		&'a self,
		uuid: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawNeighbor>>>;

	fn shortest_paths<'a>(
		&'a self,
		source: &'a str,
		target: &'a str,
		max_depth: u32,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawPath>>>;

	/// At most `limit` nodes of the given kinds, plus the edges among the returned nodes.
	fn namespace_graph<'a>(
		&'a self,
		namespace: &'a Namespace,
		node_types: &'a [NodeType],
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<RawSubgraph>>;

	fn namespace_stats<'a>(
		&'a self,
		namespace: &'a Namespace,
		since: OffsetDateTime,
		top: u32,
	) -> BoxFuture<'a, color_eyre::Result<RawGraphStats>>;

	/// Episodes in `namespace` that mention `uuid`, newest first.
	fn source_episodes<'a>(
		&'a self,
		uuid: &'a str,
		namespace: &'a Namespace,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawEpisode>>>;

	fn add_content<'a>(
		&'a self,
		content: &'a str,
		namespace: &'a Namespace,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, color_eyre::Result<Receipt>>;

	fn build_communities<'a>(
		&'a self,
		namespaces: Option<&'a [Namespace]>,
	) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn close<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<()>>;
}

/// Opens an engine connection. Called at most once per [`GraphClient`].
pub trait GraphConnector
where
	Self: Send + Sync,
{
	fn connect<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<Arc<dyn GraphEngine>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>>;
}

/// Connects to the HTTP graph engine described by `[graph]`.
pub struct HttpConnector {
	cfg: strata_config::Graph,
}
impl HttpConnector {
	pub fn new(cfg: strata_config::Graph) -> Self {
		Self { cfg }
	}
}

#[derive(Clone)]
pub struct Providers {
	pub rerank: Arc<dyn RerankProvider>,
}

pub struct StrataService {
	pub search_cfg: strata_config::Search,
	pub rerank_cfg: ProviderConfig,
	pub client: Arc<GraphClient>,
	pub providers: Providers,
}

struct DefaultProviders;

impl GraphEngine for HttpGraphEngine {
	fn search<'a>(
		&'a self,
		query: &'a str,
		namespace: &'a Namespace,
		focal_node: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawResult>>> {
		Box::pin(async move {
			Ok(HttpGraphEngine::search(self, query, namespace, focal_node, limit).await?)
		})
	}

	fn get_node<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, color_eyre::Result<Option<RawNode>>> {
		Box::pin(async move { Ok(HttpGraphEngine::get_node(self, uuid).await?) })
	}

	fn get_edge<'a>(&'a self, uuid: &'a str) -> BoxFuture<'a, color_eyre::Result<Option<RawEdge>>> {
		Box::pin(async move { Ok(HttpGraphEngine::get_edge(self, uuid).await?) })
	}

	fn get_neighbors<'a>(
		&'a self,
		uuid: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawNeighbor>>> {
		Box::pin(async move { Ok(HttpGraphEngine::get_neighbors(self, uuid).await?) })
	}

	fn shortest_paths<'a>(
		&'a self,
		source: &'a str,
		target: &'a str,
		max_depth: u32,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawPath>>> {
		Box::pin(async move {
			Ok(HttpGraphEngine::shortest_paths(self, source, target, max_depth, limit).await?)
		})
	}

	fn namespace_graph<'a>(
		&'a self,
		namespace: &'a Namespace,
		node_types: &'a [NodeType],
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<RawSubgraph>> {
		Box::pin(async move {
			Ok(HttpGraphEngine::namespace_graph(self, namespace, node_types, limit).await?)
		})
	}

	fn namespace_stats<'a>(
		&'a self,
		namespace: &'a Namespace,
		since: OffsetDateTime,
		top: u32,
	) -> BoxFuture<'a, color_eyre::Result<RawGraphStats>> {
		Box::pin(async move { Ok(HttpGraphEngine::namespace_stats(self, namespace, since, top).await?) })
	}

	fn source_episodes<'a>(
		&'a self,
		uuid: &'a str,
		namespace: &'a Namespace,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RawEpisode>>> {
		Box::pin(async move {
			Ok(HttpGraphEngine::source_episodes(self, uuid, namespace, limit).await?)
		})
	}

	fn add_content<'a>(
		&'a self,
		content: &'a str,
		namespace: &'a Namespace,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, color_eyre::Result<Receipt>> {
		Box::pin(async move {
			Ok(HttpGraphEngine::add_content(self, content, namespace, metadata).await?)
		})
	}

	fn build_communities<'a>(
		&'a self,
		namespaces: Option<&'a [Namespace]>,
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(HttpGraphEngine::build_communities(self, namespaces).await?) })
	}

	fn close<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<()>> {
		// The HTTP client holds no server-side session.
		Box::pin(async { Ok(()) })
	}
}

impl GraphConnector for HttpConnector {
	fn connect<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<Arc<dyn GraphEngine>>> {
		Box::pin(async move {
			let engine = HttpGraphEngine::connect(&self.cfg).await?;

			Ok(Arc::new(engine) as Arc<dyn GraphEngine>)
		})
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>> {
		Box::pin(async move { Ok(rerank::rerank(cfg, query, docs).await?) })
	}
}

impl Providers {
	pub fn new(rerank: Arc<dyn RerankProvider>) -> Self {
		Self { rerank }
	}
}

impl Default for Providers {
	fn default() -> Self {
		Self { rerank: Arc::new(DefaultProviders) }
	}
}

impl StrataService {
	pub fn new(cfg: &Config, client: Arc<GraphClient>) -> Self {
		Self::with_providers(cfg, client, Providers::default())
	}

	pub fn with_providers(cfg: &Config, client: Arc<GraphClient>, providers: Providers) -> Self {
		Self {
			search_cfg: cfg.search.clone(),
			rerank_cfg: cfg.providers.rerank.clone(),
			client,
			providers,
		}
	}
}

pub(crate) fn identity_key(identity: Option<&str>) -> &str {
	identity.unwrap_or(client::ANONYMOUS)
}
