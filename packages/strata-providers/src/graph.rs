//! JSON-over-HTTP client for the external graph engine.
//!
//! Every payload the engine returns is converted into the strict `strata_domain::graph` shapes
//! here, once. Missing optional fields take defaults; records without a usable identifier or
//! namespace are rejected.

use std::{collections::BTreeMap, time::Duration};

use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, Result};
use strata_domain::{
	Direction, Namespace, NodeType, RawDegree, RawEdge, RawEpisode, RawGraphStats, RawNeighbor,
	RawNode, RawPath, RawResult, RawSubgraph, Receipt, graph::sanitize_score, namespace,
};

const UNKNOWN_NAME: &str = "Unknown";
const DEFAULT_RELATION: &str = "RELATES_TO";

pub struct HttpGraphEngine {
	client: Client,
	api_base: String,
	headers: HeaderMap,
}
impl HttpGraphEngine {
	/// Builds the shared HTTP client and checks the engine answers its health probe.
	pub async fn connect(cfg: &strata_config::Graph) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let headers = crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?;
		let engine = Self { client, api_base: cfg.api_base.clone(), headers };

		engine
			.client
			.get(engine.url("/healthcheck"))
			.headers(engine.headers.clone())
			.send()
			.await?
			.error_for_status()?;

		tracing::info!(api_base = %engine.api_base, "Connected to graph engine.");

		Ok(engine)
	}

	pub async fn search(
		&self,
		query: &str,
		namespace: &Namespace,
		focal_node: Option<&str>,
		limit: u32,
	) -> Result<Vec<RawResult>> {
		let body = SearchBody {
			query,
			group_ids: vec![namespace.to_string()],
			center_node_uuid: focal_node,
			num_results: limit,
		};
		let envelope: SearchEnvelope = self.post_json("/search", &body).await?;

		Ok(envelope.results.into_iter().map(WireResult::into_raw).collect())
	}

	pub async fn get_node(&self, uuid: &str) -> Result<Option<RawNode>> {
		let Some(node) = self.get_optional::<WireNode>(&format!("/nodes/{uuid}")).await? else {
			return Ok(None);
		};

		node.into_raw().map(Some)
	}

	pub async fn get_edge(&self, uuid: &str) -> Result<Option<RawEdge>> {
		let edge = self.get_optional::<WireEdge>(&format!("/edges/{uuid}")).await?;

		Ok(edge.map(WireEdge::into_raw))
	}

	pub async fn get_neighbors(&self, uuid: &str) -> Result<Vec<RawNeighbor>> {
		let Some(envelope) =
			self.get_optional::<NeighborEnvelope>(&format!("/nodes/{uuid}/neighbors")).await?
		else {
			return Ok(Vec::new());
		};

		Ok(convert_neighbors(uuid, envelope.neighbors))
	}

	pub async fn shortest_paths(
		&self,
		source: &str,
		target: &str,
		max_depth: u32,
		limit: u32,
	) -> Result<Vec<RawPath>> {
		let body = serde_json::json!({
			"source_uuid": source,
			"target_uuid": target,
			"max_depth": max_depth,
			"limit": limit,
		});
		let envelope: PathEnvelope = self.post_json("/paths", &body).await?;

		envelope.paths.into_iter().map(WirePath::into_raw).collect()
	}

	pub async fn add_content(
		&self,
		content: &str,
		namespace: &Namespace,
		metadata: &Map<String, Value>,
	) -> Result<Receipt> {
		let body = serde_json::json!({
			"content": content,
			"group_id": namespace.to_string(),
			"metadata": metadata,
		});
		let receipt: WireReceipt = self.post_json("/episodes", &body).await?;

		Ok(Receipt {
			episode_uuid: receipt.uuid,
			namespace: namespace.clone(),
			node_count: receipt.node_count,
			edge_count: receipt.edge_count,
		})
	}

	/// Nodes of the requested kinds in `namespace`, with the edges among them.
	pub async fn namespace_graph(
		&self,
		namespace: &Namespace,
		node_types: &[NodeType],
		limit: u32,
	) -> Result<RawSubgraph> {
		let body = serde_json::json!({
			"group_id": namespace.to_string(),
			"node_types": node_types.iter().map(|kind| kind.as_str()).collect::<Vec<_>>(),
			"limit": limit,
		});
		let envelope: SubgraphEnvelope = self.post_json("/graph", &body).await?;

		Ok(RawSubgraph {
			nodes: convert_nodes(envelope.nodes),
			edges: envelope.edges.into_iter().map(WireEdge::into_raw).collect(),
		})
	}

	pub async fn namespace_stats(
		&self,
		namespace: &Namespace,
		since: OffsetDateTime,
		top: u32,
	) -> Result<RawGraphStats> {
		let body = serde_json::json!({
			"group_id": namespace.to_string(),
			"since": since.format(&Rfc3339)?,
			"top": top,
		});
		let stats: WireStats = self.post_json("/graph/stats", &body).await?;

		Ok(stats.into_raw())
	}

	/// Episodes in `namespace` that mention `uuid`, newest first.
	pub async fn source_episodes(
		&self,
		uuid: &str,
		namespace: &Namespace,
		limit: u32,
	) -> Result<Vec<RawEpisode>> {
		let query = [("group_id", namespace.to_string()), ("limit", limit.to_string())];
		let Some(envelope) = self
			.get_optional_with::<EpisodeEnvelope>(&format!("/nodes/{uuid}/episodes"), &query)
			.await?
		else {
			return Ok(Vec::new());
		};

		Ok(envelope.episodes.into_iter().map(|episode| episode.into_raw(namespace)).collect())
	}

	/// `None` rebuilds every namespace; engines without namespace filters only accept that form.
	pub async fn build_communities(&self, namespaces: Option<&[Namespace]>) -> Result<()> {
		let body = match namespaces {
			Some(namespaces) => serde_json::json!({
				"group_ids": namespaces.iter().map(ToString::to_string).collect::<Vec<_>>(),
			}),
			None => serde_json::json!({}),
		};
		let _: Value = self.post_json("/communities/build", &body).await?;

		Ok(())
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.api_base, path)
	}

	async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: for<'de> Deserialize<'de>,
	{
		let res = self
			.client
			.post(self.url(path))
			.headers(self.headers.clone())
			.json(body)
			.send()
			.await?;

		Ok(res.error_for_status()?.json().await?)
	}

	async fn get_optional<T>(&self, path: &str) -> Result<Option<T>>
	where
		T: for<'de> Deserialize<'de>,
	{
		self.get_optional_with(path, &[]).await
	}

	async fn get_optional_with<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>>
	where
		T: for<'de> Deserialize<'de>,
	{
		let res = self
			.client
			.get(self.url(path))
			.headers(self.headers.clone())
			.query(query)
			.send()
			.await?;

		if res.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}

		Ok(Some(res.error_for_status()?.json().await?))
	}
}

#[derive(Serialize)]
struct SearchBody<'a> {
	query: &'a str,
	group_ids: Vec<String>,
	center_node_uuid: Option<&'a str>,
	num_results: u32,
}

#[derive(Deserialize)]
struct SearchEnvelope {
	#[serde(default, alias = "nodes", alias = "data")]
	results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct NeighborEnvelope {
	#[serde(default)]
	neighbors: Vec<WireNeighbor>,
}

#[derive(Deserialize)]
struct SubgraphEnvelope {
	#[serde(default)]
	nodes: Vec<WireNode>,
	#[serde(default)]
	edges: Vec<WireEdge>,
}

#[derive(Deserialize)]
struct EpisodeEnvelope {
	#[serde(default)]
	episodes: Vec<WireEpisode>,
}

#[derive(Deserialize)]
struct PathEnvelope {
	#[serde(default)]
	paths: Vec<WirePath>,
}

#[derive(Deserialize)]
struct WireResult {
	#[serde(alias = "id")]
	uuid: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	entity_type: Option<String>,
	#[serde(default, alias = "relevance_score")]
	score: Option<f32>,
	#[serde(default)]
	summary: Option<String>,
	#[serde(default, alias = "attributes")]
	properties: Map<String, Value>,
}
impl WireResult {
	fn into_raw(self) -> RawResult {
		RawResult {
			uuid: self.uuid,
			name: self.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
			entity_type: self.entity_type,
			score: sanitize_score(self.score.unwrap_or(0.0)),
			summary: self.summary,
			properties: self.properties,
		}
	}
}

#[derive(Deserialize)]
struct WireNode {
	#[serde(alias = "id")]
	uuid: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	labels: Vec<String>,
	#[serde(default, alias = "namespace")]
	group_id: Option<String>,
	#[serde(default)]
	entity_type: Option<String>,
	#[serde(default)]
	summary: Option<String>,
	#[serde(default, alias = "attributes")]
	properties: Map<String, Value>,
	#[serde(default)]
	created_at: Option<String>,
	#[serde(default)]
	updated_at: Option<String>,
}
impl WireNode {
	fn into_raw(self) -> Result<RawNode> {
		let Some(group_id) = self.group_id else {
			return Err(Error::InvalidResponse {
				message: format!("Graph node {} has no namespace.", self.uuid),
			});
		};
		let namespace = namespace::parse(&group_id).map_err(|err| Error::InvalidResponse {
			message: format!("Graph node {} has an unusable namespace: {err}", self.uuid),
		})?;

		Ok(RawNode {
			node_type: node_type_from_labels(&self.labels),
			name: self.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
			uuid: self.uuid,
			namespace,
			entity_type: self.entity_type,
			summary: self.summary,
			properties: self.properties,
			created_at: parse_timestamp(self.created_at.as_deref()),
			updated_at: parse_timestamp(self.updated_at.as_deref()),
		})
	}
}

#[derive(Deserialize)]
struct WireEdge {
	#[serde(alias = "id")]
	uuid: String,
	#[serde(default, alias = "type", alias = "name")]
	relation_type: Option<String>,
	#[serde(alias = "source_node_uuid", alias = "source")]
	source_uuid: String,
	#[serde(alias = "target_node_uuid", alias = "target")]
	target_uuid: String,
	#[serde(default)]
	weight: Option<f32>,
	#[serde(default, alias = "description")]
	fact: Option<String>,
	#[serde(default)]
	created_at: Option<String>,
	#[serde(default)]
	updated_at: Option<String>,
}
impl WireEdge {
	fn into_raw(self) -> RawEdge {
		RawEdge {
			uuid: self.uuid,
			relation_type: self.relation_type.unwrap_or_else(|| DEFAULT_RELATION.to_string()),
			source_uuid: self.source_uuid,
			target_uuid: self.target_uuid,
			weight: self.weight.filter(|weight| weight.is_finite()).unwrap_or(1.0),
			fact: self.fact,
			created_at: parse_timestamp(self.created_at.as_deref()),
			updated_at: parse_timestamp(self.updated_at.as_deref()),
		}
	}
}

#[derive(Deserialize)]
struct WireNeighbor {
	node: WireNode,
	edge: WireEdge,
	#[serde(default)]
	direction: Option<Direction>,
}
impl WireNeighbor {
	fn into_raw(self, center: &str) -> Result<RawNeighbor> {
		let edge = self.edge.into_raw();
		let direction = match self.direction {
			Some(direction) => direction,
			None => edge.other_end(center).map(|(_, direction)| direction).ok_or_else(|| {
				Error::InvalidResponse {
					message: format!("Edge {} does not touch node {center}.", edge.uuid),
				}
			})?,
		};

		Ok(RawNeighbor { node: self.node.into_raw()?, edge, direction })
	}
}

#[derive(Deserialize)]
struct WirePath {
	#[serde(default)]
	nodes: Vec<WireNode>,
	#[serde(default)]
	edges: Vec<WireEdge>,
}
impl WirePath {
	fn into_raw(self) -> Result<RawPath> {
		let nodes = self.nodes.into_iter().map(WireNode::into_raw).collect::<Result<Vec<_>>>()?;
		let path = RawPath { nodes, edges: self.edges.into_iter().map(WireEdge::into_raw).collect() };

		if !path.is_well_formed() {
			return Err(Error::InvalidResponse {
				message: "Graph path must have exactly one more node than edges.".to_string(),
			});
		}

		Ok(path)
	}
}

#[derive(Deserialize)]
struct WireStats {
	#[serde(default)]
	node_types: WireNodeCounts,
	#[serde(default, alias = "total_edges")]
	edge_count: u64,
	#[serde(default)]
	entity_domains: BTreeMap<String, u64>,
	#[serde(default)]
	top_entities: Vec<WireDegree>,
	#[serde(default)]
	growth: WireGrowth,
}
impl WireStats {
	fn into_raw(self) -> RawGraphStats {
		RawGraphStats {
			entity_count: self.node_types.entity,
			episode_count: self.node_types.episode,
			community_count: self.node_types.community,
			edge_count: self.edge_count,
			entity_domains: self.entity_domains,
			top_entities: self
				.top_entities
				.into_iter()
				.map(|entity| RawDegree {
					uuid: entity.uuid,
					name: entity.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
					degree: entity.degree,
				})
				.collect(),
			recent_nodes: self.growth.nodes,
			recent_edges: self.growth.edges,
		}
	}
}

#[derive(Default, Deserialize)]
struct WireNodeCounts {
	#[serde(default)]
	entity: u64,
	#[serde(default)]
	episode: u64,
	#[serde(default)]
	community: u64,
}

#[derive(Deserialize)]
struct WireDegree {
	#[serde(alias = "id")]
	uuid: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default, alias = "connection_count")]
	degree: u64,
}

#[derive(Default, Deserialize)]
struct WireGrowth {
	#[serde(default, alias = "last_7_days_nodes")]
	nodes: u64,
	#[serde(default, alias = "last_7_days_edges")]
	edges: u64,
}

#[derive(Deserialize)]
struct WireEpisode {
	#[serde(alias = "id")]
	uuid: String,
	#[serde(default, alias = "namespace")]
	group_id: Option<String>,
	#[serde(default, alias = "episode_body", alias = "body")]
	content: Option<String>,
	#[serde(default)]
	created_at: Option<String>,
}
impl WireEpisode {
	/// Episodes without a parseable namespace are attributed to the namespace that was queried.
	fn into_raw(self, queried: &Namespace) -> RawEpisode {
		let namespace = self
			.group_id
			.as_deref()
			.and_then(|raw| namespace::parse(raw).ok())
			.unwrap_or_else(|| queried.clone());

		RawEpisode {
			uuid: self.uuid,
			namespace,
			content: self.content.unwrap_or_default(),
			created_at: parse_timestamp(self.created_at.as_deref()),
		}
	}
}

#[derive(Deserialize)]
struct WireReceipt {
	#[serde(alias = "episode_uuid")]
	uuid: String,
	#[serde(default)]
	node_count: u32,
	#[serde(default)]
	edge_count: u32,
}

/// Records that fail conversion are skipped; they never reach callers with a guessed namespace.
fn convert_neighbors(center: &str, wire: Vec<WireNeighbor>) -> Vec<RawNeighbor> {
	wire.into_iter()
		.filter_map(|neighbor| match neighbor.into_raw(center) {
			Ok(neighbor) => Some(neighbor),
			Err(err) => {
				tracing::warn!(error = %err, node_uuid = center, "Skipping unusable graph neighbor.");

				None
			},
		})
		.collect()
}

fn convert_nodes(wire: Vec<WireNode>) -> Vec<RawNode> {
	wire.into_iter()
		.filter_map(|node| match node.into_raw() {
			Ok(node) => Some(node),
			Err(err) => {
				tracing::warn!(error = %err, "Skipping unusable graph node.");

				None
			},
		})
		.collect()
}

fn node_type_from_labels(labels: &[String]) -> NodeType {
	if labels.iter().any(|label| label == "EpisodicNode") {
		NodeType::Episode
	} else if labels.iter().any(|label| label == "CommunityNode") {
		NodeType::Community
	} else {
		NodeType::Entity
	}
}

fn parse_timestamp(raw: Option<&str>) -> Option<OffsetDateTime> {
	raw.and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok())
}
