//! Shortest-path discovery between two readable nodes.
//!
//! Engines that declare native path support answer directly. Otherwise paths are found by a
//! breadth-first walk over neighbor lookups, which yields paths in non-decreasing length. Both
//! strategies share one time budget; what was found when it runs out is returned.

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use crate::{Error, Result, StrataService, graph::NodeRef, search::can_read};
use strata_domain::{RawEdge, RawNeighbor, RawNode, RawPath};

/// Upper bound on partial paths held between breadth-first levels.
const MAX_FRONTIER: usize = 10_000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PathRequest {
	pub source_uuid: String,
	pub target_uuid: String,
	#[serde(default)]
	pub max_depth: Option<u32>,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathEdge {
	pub uuid: String,
	pub relation_type: String,
	pub source_uuid: String,
	pub target_uuid: String,
}
impl From<&RawEdge> for PathEdge {
	fn from(edge: &RawEdge) -> Self {
		Self {
			uuid: edge.uuid.clone(),
			relation_type: edge.relation_type.clone(),
			source_uuid: edge.source_uuid.clone(),
			target_uuid: edge.target_uuid.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphPath {
	pub nodes: Vec<NodeRef>,
	pub edges: Vec<PathEdge>,
	pub length: usize,
}
impl From<&RawPath> for GraphPath {
	fn from(path: &RawPath) -> Self {
		Self {
			nodes: path.nodes.iter().map(NodeRef::from).collect(),
			edges: path.edges.iter().map(PathEdge::from).collect(),
			length: path.len(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathSet {
	pub source_uuid: String,
	pub target_uuid: String,
	pub paths: Vec<GraphPath>,
	pub total: usize,
	pub shortest_length: Option<usize>,
	pub search_time_ms: u64,
	/// The time budget or frontier cap ended the search early.
	pub truncated: bool,
}

struct PathSearch<'a> {
	identity: &'a str,
	target: &'a str,
	max_depth: u32,
	limit: usize,
	deadline: Instant,
}

impl StrataService {
	pub async fn find_paths(&self, identity: &str, req: &PathRequest) -> Result<PathSet> {
		let started = Instant::now();
		let max_depth = req.max_depth.unwrap_or(self.search_cfg.max_path_depth);
		let limit = req.limit.unwrap_or(self.search_cfg.max_paths);

		if !(1..=self.search_cfg.max_path_depth).contains(&max_depth) {
			return Err(Error::InvalidRequest {
				message: format!(
					"max_depth must be in the range 1-{}.",
					self.search_cfg.max_path_depth
				),
			});
		}
		if !(1..=self.search_cfg.max_paths).contains(&limit) {
			return Err(Error::InvalidRequest {
				message: format!("limit must be in the range 1-{}.", self.search_cfg.max_paths),
			});
		}

		let source = self.readable_node(identity, &req.source_uuid).await?;
		let target = self.readable_node(identity, &req.target_uuid).await?;
		let search = PathSearch {
			identity,
			target: &target.uuid,
			max_depth,
			limit: limit as usize,
			deadline: started + Duration::from_millis(self.search_cfg.path_timeout_ms),
		};
		let (mut paths, truncated) = if source.uuid == target.uuid {
			(vec![RawPath { nodes: vec![source.clone()], edges: Vec::new() }], false)
		} else if self.client.capabilities().native_paths {
			self.native_paths(&source, &search).await?
		} else {
			self.walk_paths(&source, &search).await
		};

		paths.sort_by_key(RawPath::len);
		paths.truncate(search.limit);

		let paths = paths.iter().map(GraphPath::from).collect::<Vec<_>>();
		let search_time_ms = started.elapsed().as_millis() as u64;

		tracing::info!(
			source = %source.uuid,
			target = %target.uuid,
			paths = paths.len(),
			truncated,
			search_time_ms,
			"Path search finished."
		);

		Ok(PathSet {
			source_uuid: source.uuid,
			target_uuid: target.uuid,
			total: paths.len(),
			shortest_length: paths.first().map(|path| path.length),
			paths,
			search_time_ms,
			truncated,
		})
	}

	async fn native_paths(
		&self,
		source: &RawNode,
		search: &PathSearch<'_>,
	) -> Result<(Vec<RawPath>, bool)> {
		let raw = self
			.client
			.find_shortest_paths(
				search.identity,
				&source.uuid,
				search.target,
				search.max_depth,
				search.limit as u32,
				Some(search.deadline),
			)
			.await?;
		let truncated = raw.is_empty() && Instant::now() >= search.deadline;
		let paths = raw
			.into_iter()
			.filter(|path| {
				path.is_well_formed()
					&& path.len() <= search.max_depth as usize
					&& path.nodes.iter().all(|node| can_read(&node.namespace, Some(search.identity)))
			})
			.collect();

		Ok((paths, truncated))
	}

	/// Level-by-level expansion of simple paths from `source`.
	async fn walk_paths(&self, source: &RawNode, search: &PathSearch<'_>) -> (Vec<RawPath>, bool) {
		let mut found = Vec::new();
		let mut frontier = vec![RawPath { nodes: vec![source.clone()], edges: Vec::new() }];
		let mut adjacency: HashMap<String, Vec<RawNeighbor>> = HashMap::new();
		let mut truncated = false;

		for _ in 0..search.max_depth {
			let mut next = Vec::new();

			for partial in &frontier {
				let Some(tail) = partial.nodes.last() else {
					continue;
				};

				if !adjacency.contains_key(&tail.uuid) {
					if Instant::now() >= search.deadline {
						return (found, true);
					}

					let neighbors = match self
						.client
						.get_edges_for_node(search.identity, &tail.uuid, Some(search.deadline))
						.await
					{
						Ok(neighbors) => neighbors,
						Err(Error::Timeout { .. }) => return (found, true),
						Err(err) => {
							tracing::warn!(
								error = %err,
								node = %tail.uuid,
								"Neighbor lookup failed during path search. Skipping node."
							);

							Vec::new()
						},
					};

					adjacency.insert(tail.uuid.clone(), neighbors);
				}

				for neighbor in adjacency.get(&tail.uuid).into_iter().flatten() {
					if !can_read(&neighbor.node.namespace, Some(search.identity))
						|| partial.nodes.iter().any(|node| node.uuid == neighbor.node.uuid)
					{
						continue;
					}

					let mut extended = partial.clone();

					extended.nodes.push(neighbor.node.clone());
					extended.edges.push(neighbor.edge.clone());

					if neighbor.node.uuid == search.target {
						found.push(extended);

						if found.len() >= search.limit {
							return (found, truncated);
						}
					} else {
						next.push(extended);
					}
				}
			}

			if next.is_empty() {
				break;
			}
			if next.len() > MAX_FRONTIER {
				tracing::warn!(frontier = next.len(), "Path search frontier capped.");

				next.truncate(MAX_FRONTIER);

				truncated = true;
			}

			frontier = next;
		}

		(found, truncated)
	}
}
