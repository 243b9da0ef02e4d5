//! Read-only projections of graph engine state.
//!
//! These are the strict shapes every engine implementation must produce. Optional fields
//! default at the engine boundary so nothing downstream inspects raw payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::Namespace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
	#[default]
	Entity,
	Episode,
	Community,
}
impl NodeType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Entity => "entity",
			Self::Episode => "episode",
			Self::Community => "community",
		}
	}

	/// Case-insensitive inverse of [`NodeType::as_str`].
	pub fn parse(raw: &str) -> Option<Self> {
		[Self::Entity, Self::Episode, Self::Community]
			.into_iter()
			.find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
	}
}

/// Edge direction relative to the node being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	Incoming,
	Outgoing,
}

/// One hit from a namespace-scoped engine search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
	pub uuid: String,
	pub name: String,
	pub entity_type: Option<String>,
	pub score: f32,
	pub summary: Option<String>,
	pub properties: Map<String, Value>,
}
impl RawResult {
	pub fn new(uuid: impl Into<String>, name: impl Into<String>, score: f32) -> Self {
		Self {
			uuid: uuid.into(),
			name: name.into(),
			entity_type: None,
			score: sanitize_score(score),
			summary: None,
			properties: Map::new(),
		}
	}

	pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
		self.entity_type = Some(entity_type.into());

		self
	}

	pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
		self.summary = Some(summary.into());

		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
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
}
impl RawNode {
	pub fn new(uuid: impl Into<String>, name: impl Into<String>, namespace: Namespace) -> Self {
		Self {
			uuid: uuid.into(),
			name: name.into(),
			node_type: NodeType::Entity,
			namespace,
			entity_type: None,
			summary: None,
			properties: Map::new(),
			created_at: None,
			updated_at: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEdge {
	pub uuid: String,
	pub relation_type: String,
	pub source_uuid: String,
	pub target_uuid: String,
	pub weight: f32,
	pub fact: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_at: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub updated_at: Option<OffsetDateTime>,
}
impl RawEdge {
	pub fn new(
		uuid: impl Into<String>,
		relation_type: impl Into<String>,
		source_uuid: impl Into<String>,
		target_uuid: impl Into<String>,
	) -> Self {
		Self {
			uuid: uuid.into(),
			relation_type: relation_type.into(),
			source_uuid: source_uuid.into(),
			target_uuid: target_uuid.into(),
			weight: 1.0,
			fact: None,
			created_at: None,
			updated_at: None,
		}
	}

	/// The endpoint on the far side of `uuid`, with the direction seen from `uuid`.
	pub fn other_end(&self, uuid: &str) -> Option<(&str, Direction)> {
		if self.source_uuid == uuid {
			Some((&self.target_uuid, Direction::Outgoing))
		} else if self.target_uuid == uuid {
			Some((&self.source_uuid, Direction::Incoming))
		} else {
			None
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNeighbor {
	pub node: RawNode,
	pub edge: RawEdge,
	pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPath {
	pub nodes: Vec<RawNode>,
	pub edges: Vec<RawEdge>,
}
impl RawPath {
	pub fn len(&self) -> usize {
		self.edges.len()
	}

	pub fn is_empty(&self) -> bool {
		self.edges.is_empty()
	}

	/// A path of `n` edges visits `n + 1` nodes.
	pub fn is_well_formed(&self) -> bool {
		!self.nodes.is_empty() && self.nodes.len() == self.edges.len() + 1
	}
}

/// The nodes of one namespace and the edges running between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSubgraph {
	pub nodes: Vec<RawNode>,
	pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDegree {
	pub uuid: String,
	pub name: String,
	pub degree: u64,
}

/// Aggregate counts for one namespace. `recent_*` count items created after the requested instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGraphStats {
	pub entity_count: u64,
	pub episode_count: u64,
	pub community_count: u64,
	pub edge_count: u64,
	pub entity_domains: BTreeMap<String, u64>,
	pub top_entities: Vec<RawDegree>,
	pub recent_nodes: u64,
	pub recent_edges: u64,
}
impl RawGraphStats {
	pub fn node_count(&self) -> u64 {
		self.entity_count + self.episode_count + self.community_count
	}
}

/// An ingested episode that mentions some entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEpisode {
	pub uuid: String,
	pub namespace: Namespace,
	pub content: String,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_at: Option<OffsetDateTime>,
}

/// Acknowledgement for ingested content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
	pub episode_uuid: String,
	pub namespace: Namespace,
	pub node_count: u32,
	pub edge_count: u32,
}

/// Scores are non-negative and finite everywhere past the engine boundary.
pub fn sanitize_score(score: f32) -> f32 {
	if score.is_finite() && score > 0.0 { score } else { 0.0 }
}
