//! Node, edge, neighborhood, and whole-namespace reads with per-identity visibility.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

use crate::{Error, Result, StrataService, search::can_read};
use strata_domain::{
	Direction, Namespace, NodeType, RawEdge, RawEpisode, RawNeighbor, RawNode, namespace,
};

pub const MAX_NEIGHBOR_LIMIT: u32 = 500;
pub const DEFAULT_EXPORT_LIMIT: u32 = 1_000;
pub const MAX_EXPORT_LIMIT: u32 = 5_000;
pub const SOURCE_EPISODE_LIMIT: u32 = 10;
pub const TOP_ENTITY_COUNT: u32 = 5;

const EPISODE_PREVIEW_CHARS: usize = 200;
const GROWTH_WINDOW: Duration = Duration::days(7);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborDirection {
	Incoming,
	Outgoing,
	#[default]
	Both,
}
impl NeighborDirection {
	fn admits(self, direction: Direction) -> bool {
		match self {
			Self::Both => true,
			Self::Incoming => direction == Direction::Incoming,
			Self::Outgoing => direction == Direction::Outgoing,
		}
	}
}

/// Neighbor filters. Empty type lists admit everything; non-empty lists must both match.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NeighborQuery {
	#[serde(default)]
	pub direction: NeighborDirection,
	/// Matches a node's kind (`entity`, `episode`, `community`) or its entity type.
	#[serde(default)]
	pub node_types: Vec<String>,
	#[serde(default)]
	pub relation_types: Vec<String>,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeDetailOptions {
	#[serde(default = "default_true")]
	pub include_neighbors: bool,
	#[serde(default)]
	pub include_episodes: bool,
	#[serde(default)]
	pub neighbors: NeighborQuery,
}
impl Default for NodeDetailOptions {
	fn default() -> Self {
		Self { include_neighbors: true, include_episodes: false, neighbors: NeighborQuery::default() }
	}
}

/// Which part of a namespace to export. Without `node_types`, entities are exported, plus
/// episodes when `include_episodes` is set.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GraphExportQuery {
	#[serde(default)]
	pub namespace: Option<Namespace>,
	#[serde(default)]
	pub include_episodes: bool,
	#[serde(default)]
	pub node_types: Vec<String>,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeRef {
	pub uuid: String,
	pub name: String,
	pub node_type: NodeType,
}
impl From<&RawNode> for NodeRef {
	fn from(node: &RawNode) -> Self {
		Self { uuid: node.uuid.clone(), name: node.name.clone(), node_type: node.node_type }
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Neighbor {
	pub uuid: String,
	pub name: String,
	pub node_type: NodeType,
	pub entity_type: Option<String>,
	pub namespace: Namespace,
	pub edge_uuid: String,
	pub relation_type: String,
	pub direction: Direction,
}
impl From<RawNeighbor> for Neighbor {
	fn from(neighbor: RawNeighbor) -> Self {
		Self {
			uuid: neighbor.node.uuid,
			name: neighbor.node.name,
			node_type: neighbor.node.node_type,
			entity_type: neighbor.node.entity_type,
			namespace: neighbor.node.namespace,
			edge_uuid: neighbor.edge.uuid,
			relation_type: neighbor.edge.relation_type,
			direction: neighbor.direction,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NeighborSet {
	pub node_uuid: String,
	pub neighbors: Vec<Neighbor>,
	pub total: usize,
	pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeDetail {
	pub uuid: String,
	pub name: String,
	pub node_type: NodeType,
	pub namespace: Namespace,
	pub entity_type: Option<String>,
	pub summary: Option<String>,
	pub properties: Map<String, Value>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_at: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub updated_at: Option<OffsetDateTime>,
	pub neighbors: Option<Vec<Neighbor>>,
	pub has_more_neighbors: bool,
	pub source_episodes: Option<Vec<SourceEpisode>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceEpisode {
	pub uuid: String,
	/// The first 200 characters of the episode body.
	pub content: String,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_at: Option<OffsetDateTime>,
}
impl From<RawEpisode> for SourceEpisode {
	fn from(episode: RawEpisode) -> Self {
		Self {
			uuid: episode.uuid,
			content: preview(&episode.content),
			created_at: episode.created_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphNode {
	pub uuid: String,
	pub name: String,
	pub node_type: NodeType,
	pub entity_type: Option<String>,
	pub summary: Option<String>,
}
impl From<RawNode> for GraphNode {
	fn from(node: RawNode) -> Self {
		Self {
			uuid: node.uuid,
			name: node.name,
			node_type: node.node_type,
			entity_type: node.entity_type,
			summary: node.summary,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphEdge {
	pub uuid: String,
	pub relation_type: String,
	pub source_uuid: String,
	pub target_uuid: String,
	pub weight: f32,
}
impl From<RawEdge> for GraphEdge {
	fn from(edge: RawEdge) -> Self {
		Self {
			uuid: edge.uuid,
			relation_type: edge.relation_type,
			source_uuid: edge.source_uuid,
			target_uuid: edge.target_uuid,
			weight: edge.weight,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NamespaceGraph {
	pub namespace: Namespace,
	pub nodes: Vec<GraphNode>,
	pub edges: Vec<GraphEdge>,
	pub node_count: usize,
	pub edge_count: usize,
	/// The node cap was reached, so the namespace may hold more.
	pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeTypeCounts {
	pub entity: u64,
	pub episode: u64,
	pub community: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TopEntity {
	pub uuid: String,
	pub name: String,
	pub connection_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GraphGrowth {
	pub last_7_days_nodes: u64,
	pub last_7_days_edges: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphStats {
	pub namespace: Namespace,
	pub total_nodes: u64,
	pub total_edges: u64,
	pub node_types: NodeTypeCounts,
	pub entity_domains: BTreeMap<String, u64>,
	pub top_entities: Vec<TopEntity>,
	pub growth: GraphGrowth,
	#[serde(with = "time::serde::rfc3339")]
	pub generated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EdgeDetail {
	pub uuid: String,
	pub relation_type: String,
	pub source: NodeRef,
	pub target: NodeRef,
	pub weight: f32,
	pub fact: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_at: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub updated_at: Option<OffsetDateTime>,
}

impl StrataService {
	/// A node plus, optionally, its readable neighborhood and the episodes that mention it.
	pub async fn get_node_detail(
		&self,
		identity: &str,
		uuid: &str,
		options: &NodeDetailOptions,
	) -> Result<NodeDetail> {
		let node = self.readable_node(identity, uuid).await?;
		let (neighbors, has_more_neighbors) = if options.include_neighbors {
			let set = self.neighbors_of(identity, &node, &options.neighbors).await?;

			(Some(set.neighbors), set.has_more)
		} else {
			(None, false)
		};
		let source_episodes = if options.include_episodes {
			let episodes = self
				.client
				.source_episodes(identity, &node.uuid, &node.namespace, SOURCE_EPISODE_LIMIT)
				.await?;

			Some(
				episodes
					.into_iter()
					.filter(|episode| can_read(&episode.namespace, Some(identity)))
					.map(SourceEpisode::from)
					.collect(),
			)
		} else {
			None
		};

		Ok(NodeDetail {
			uuid: node.uuid,
			name: node.name,
			node_type: node.node_type,
			namespace: node.namespace,
			entity_type: node.entity_type,
			summary: node.summary,
			properties: node.properties,
			created_at: node.created_at,
			updated_at: node.updated_at,
			neighbors,
			has_more_neighbors,
			source_episodes,
		})
	}

	/// Nodes of one namespace and the edges among them, for rendering a whole graph.
	pub async fn get_namespace_graph(
		&self,
		identity: &str,
		query: &GraphExportQuery,
	) -> Result<NamespaceGraph> {
		let namespace = readable_namespace(identity, query.namespace.as_ref())?;
		let limit = query.limit.unwrap_or(DEFAULT_EXPORT_LIMIT);

		if !(1..=MAX_EXPORT_LIMIT).contains(&limit) {
			return Err(Error::InvalidRequest {
				message: format!("graph limit must be in the range 1-{MAX_EXPORT_LIMIT}."),
			});
		}

		let node_types = export_node_types(query)?;
		let raw = self.client.namespace_graph(identity, &namespace, &node_types, limit).await?;
		let mut nodes = raw
			.nodes
			.into_iter()
			.filter(|node| node.namespace == namespace && node_types.contains(&node.node_type))
			.collect::<Vec<_>>();

		nodes.truncate(limit as usize);

		let truncated = nodes.len() == limit as usize;
		let kept = nodes.iter().map(|node| node.uuid.clone()).collect::<HashSet<_>>();
		let edges = raw
			.edges
			.into_iter()
			.filter(|edge| kept.contains(&edge.source_uuid) && kept.contains(&edge.target_uuid))
			.map(GraphEdge::from)
			.collect::<Vec<_>>();
		let nodes = nodes.into_iter().map(GraphNode::from).collect::<Vec<_>>();

		tracing::info!(
			identity,
			namespace = %namespace,
			nodes = nodes.len(),
			edges = edges.len(),
			truncated,
			"Namespace graph exported."
		);

		Ok(NamespaceGraph {
			namespace,
			node_count: nodes.len(),
			edge_count: edges.len(),
			nodes,
			edges,
			truncated,
		})
	}

	/// Node and edge counts, domain breakdown, best-connected entities, and seven-day growth.
	pub async fn get_graph_stats(
		&self,
		identity: &str,
		namespace: Option<&Namespace>,
	) -> Result<GraphStats> {
		let namespace = readable_namespace(identity, namespace)?;
		let now = OffsetDateTime::now_utc();
		let raw = self
			.client
			.namespace_stats(identity, &namespace, now - GROWTH_WINDOW, TOP_ENTITY_COUNT)
			.await?;
		let total_nodes = raw.node_count();
		let mut top_entities = raw
			.top_entities
			.into_iter()
			.map(|entity| TopEntity {
				uuid: entity.uuid,
				name: entity.name,
				connection_count: entity.degree,
			})
			.collect::<Vec<_>>();

		top_entities.sort_by(|a, b| b.connection_count.cmp(&a.connection_count));
		top_entities.truncate(TOP_ENTITY_COUNT as usize);

		Ok(GraphStats {
			total_nodes,
			total_edges: raw.edge_count,
			node_types: NodeTypeCounts {
				entity: raw.entity_count,
				episode: raw.episode_count,
				community: raw.community_count,
			},
			entity_domains: raw.entity_domains,
			top_entities,
			growth: GraphGrowth {
				last_7_days_nodes: raw.recent_nodes,
				last_7_days_edges: raw.recent_edges,
			},
			generated_at: now,
			namespace,
		})
	}

	pub async fn get_neighbors(
		&self,
		identity: &str,
		uuid: &str,
		query: &NeighborQuery,
	) -> Result<NeighborSet> {
		let node = self.readable_node(identity, uuid).await?;

		self.neighbors_of(identity, &node, query).await
	}

	/// An edge is visible only when both endpoints are.
	pub async fn get_edge_detail(&self, identity: &str, uuid: &str) -> Result<EdgeDetail> {
		let edge = self
			.client
			.get_edge(identity, uuid, None)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Edge {uuid} does not exist.") })?;
		let source = self.endpoint(identity, &edge, &edge.source_uuid).await?;
		let target = self.endpoint(identity, &edge, &edge.target_uuid).await?;

		Ok(EdgeDetail {
			uuid: edge.uuid,
			relation_type: edge.relation_type,
			source: NodeRef::from(&source),
			target: NodeRef::from(&target),
			weight: edge.weight,
			fact: edge.fact,
			created_at: edge.created_at,
			updated_at: edge.updated_at,
		})
	}

	pub(crate) async fn readable_node(&self, identity: &str, uuid: &str) -> Result<RawNode> {
		let node = self
			.client
			.get_node(identity, uuid, None)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Node {uuid} does not exist.") })?;

		if !can_read(&node.namespace, Some(identity)) {
			return Err(Error::AccessDenied {
				message: format!("Node {uuid} is not readable by this identity."),
			});
		}

		Ok(node)
	}

	async fn endpoint(&self, identity: &str, edge: &RawEdge, uuid: &str) -> Result<RawNode> {
		match self.readable_node(identity, uuid).await {
			Err(Error::NotFound { .. }) => Err(Error::NotFound {
				message: format!("Edge {} references missing node {uuid}.", edge.uuid),
			}),
			Err(Error::AccessDenied { .. }) => Err(Error::AccessDenied {
				message: format!("Edge {} is not readable by this identity.", edge.uuid),
			}),
			other => other,
		}
	}

	async fn neighbors_of(
		&self,
		identity: &str,
		node: &RawNode,
		query: &NeighborQuery,
	) -> Result<NeighborSet> {
		let limit = query.limit.unwrap_or(self.search_cfg.neighbor_limit);

		if !(1..=MAX_NEIGHBOR_LIMIT).contains(&limit) {
			return Err(Error::InvalidRequest {
				message: format!("neighbor limit must be in the range 1-{MAX_NEIGHBOR_LIMIT}."),
			});
		}

		let raw = self.client.get_edges_for_node(identity, &node.uuid, None).await?;
		let mut neighbors = raw
			.into_iter()
			.filter(|neighbor| {
				can_read(&neighbor.node.namespace, Some(identity)) && matches_filters(neighbor, query)
			})
			.map(Neighbor::from)
			.collect::<Vec<_>>();
		let total = neighbors.len();
		let has_more = total > limit as usize;

		neighbors.truncate(limit as usize);

		Ok(NeighborSet { node_uuid: node.uuid.clone(), neighbors, total, has_more })
	}
}

fn default_true() -> bool {
	true
}

/// The requested namespace, or the caller's private one, provided the caller may read it.
fn readable_namespace(identity: &str, requested: Option<&Namespace>) -> Result<Namespace> {
	let namespace = match requested {
		Some(requested) => requested.clone(),
		None => namespace::user_namespace(identity)?,
	};

	if !can_read(&namespace, Some(identity)) {
		return Err(Error::AccessDenied {
			message: format!("Namespace {namespace} is not readable by this identity."),
		});
	}

	Ok(namespace)
}

fn export_node_types(query: &GraphExportQuery) -> Result<Vec<NodeType>> {
	if query.node_types.is_empty() {
		let mut kinds = vec![NodeType::Entity];

		if query.include_episodes {
			kinds.push(NodeType::Episode);
		}

		return Ok(kinds);
	}

	let mut kinds = Vec::new();

	for raw in &query.node_types {
		let kind = NodeType::parse(raw).ok_or_else(|| Error::InvalidRequest {
			message: format!("Unknown node type {raw:?}. Expected entity, episode, or community."),
		})?;

		if !kinds.contains(&kind) {
			kinds.push(kind);
		}
	}

	Ok(kinds)
}

fn preview(content: &str) -> String {
	match content.char_indices().nth(EPISODE_PREVIEW_CHARS) {
		Some((cut, _)) => format!("{}...", &content[..cut]),
		None => content.to_string(),
	}
}

fn matches_filters(neighbor: &RawNeighbor, query: &NeighborQuery) -> bool {
	if !query.direction.admits(neighbor.direction) {
		return false;
	}

	let node = &neighbor.node;
	let type_ok = query.node_types.is_empty()
		|| query.node_types.iter().any(|wanted| {
			wanted.eq_ignore_ascii_case(node.node_type.as_str())
				|| node.entity_type.as_deref().is_some_and(|entity_type| entity_type == wanted)
		});
	let relation_ok = query.relation_types.is_empty()
		|| query.relation_types.iter().any(|wanted| *wanted == neighbor.edge.relation_type);

	type_ok && relation_ok
}

#[cfg(test)]
mod tests {
	use super::*;

	fn neighbor(uuid: &str, relation: &str, direction: Direction) -> RawNeighbor {
		let mut node = RawNode::new(uuid, uuid, Namespace::Global);

		node.entity_type = Some("Paper".to_string());

		let edge = match direction {
			Direction::Outgoing => RawEdge::new(format!("e-{uuid}"), relation, "center", uuid),
			Direction::Incoming => RawEdge::new(format!("e-{uuid}"), relation, uuid, "center"),
		};

		RawNeighbor { node, edge, direction }
	}

	#[test]
	fn direction_filter_applies() {
		let query = NeighborQuery { direction: NeighborDirection::Incoming, ..Default::default() };

		assert!(matches_filters(&neighbor("a", "CITES", Direction::Incoming), &query));
		assert!(!matches_filters(&neighbor("a", "CITES", Direction::Outgoing), &query));
	}

	#[test]
	fn type_and_relation_filters_are_conjunctive() {
		let query = NeighborQuery {
			node_types: vec!["Paper".to_string()],
			relation_types: vec!["CITES".to_string()],
			..Default::default()
		};

		assert!(matches_filters(&neighbor("a", "CITES", Direction::Outgoing), &query));
		assert!(!matches_filters(&neighbor("a", "AUTHORED", Direction::Outgoing), &query));

		let query = NeighborQuery { node_types: vec!["community".to_string()], ..query };

		assert!(!matches_filters(&neighbor("a", "CITES", Direction::Outgoing), &query));
	}

	#[test]
	fn export_defaults_to_entities() {
		let plain = export_node_types(&GraphExportQuery::default()).expect("kinds");
		let with_episodes =
			export_node_types(&GraphExportQuery { include_episodes: true, ..Default::default() })
				.expect("kinds");

		assert_eq!(plain, vec![NodeType::Entity]);
		assert_eq!(with_episodes, vec![NodeType::Entity, NodeType::Episode]);
	}

	#[test]
	fn explicit_node_types_override_episode_flag() {
		let query = GraphExportQuery {
			include_episodes: true,
			node_types: vec!["Community".to_string(), "community".to_string()],
			..Default::default()
		};

		assert_eq!(export_node_types(&query).expect("kinds"), vec![NodeType::Community]);

		let query = GraphExportQuery { node_types: vec!["paper".to_string()], ..Default::default() };

		assert!(matches!(export_node_types(&query), Err(Error::InvalidRequest { .. })));
	}

	#[test]
	fn preview_cuts_on_character_boundaries() {
		let long = "é".repeat(EPISODE_PREVIEW_CHARS + 5);
		let cut = preview(&long);

		assert_eq!(cut.chars().count(), EPISODE_PREVIEW_CHARS + 3);
		assert!(cut.ends_with("..."));
		assert_eq!(preview("short"), "short");
	}

	#[test]
	fn foreign_private_namespace_is_not_readable() {
		let bob = Namespace::User("bob".to_string());

		assert!(matches!(readable_namespace("alice", Some(&bob)), Err(Error::AccessDenied { .. })));
		assert_eq!(
			readable_namespace("alice", None).expect("namespace"),
			Namespace::User("alice".to_string())
		);
		assert_eq!(
			readable_namespace("alice", Some(&Namespace::Global)).expect("namespace"),
			Namespace::Global
		);
	}

	#[test]
	fn node_kind_matches_case_insensitively() {
		let query = NeighborQuery { node_types: vec!["Entity".to_string()], ..Default::default() };

		assert!(matches_filters(&neighbor("a", "CITES", Direction::Outgoing), &query));
	}
}
