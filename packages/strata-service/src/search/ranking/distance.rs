use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use super::cmp_f32_desc;
use crate::{
	Error, Result, StrataService,
	search::{Candidate, SearchPlan, can_read},
};

/// Upper bound on nodes expanded by one focal-distance traversal.
const MAX_VISITED: usize = 10_000;

impl StrataService {
	/// Hop counts from the focal node, breadth first, up to the plan's distance cap. Nodes the
	/// caller cannot read are neither reported nor traversed.
	pub(in crate::search) async fn focal_distances(
		&self,
		plan: &SearchPlan,
		candidates: &[Candidate],
		deadline: Option<Instant>,
	) -> Result<HashMap<String, u32>> {
		let Some(focal) = plan.focal_node.as_deref() else {
			return Err(Error::RerankFailed { message: "No usable focal node.".to_string() });
		};
		let identity = plan.identity.as_deref();
		let key = crate::identity_key(identity);
		let mut pending =
			candidates.iter().map(|candidate| candidate.result.uuid.as_str()).collect::<HashSet<_>>();
		let mut distances = HashMap::from([(focal.to_string(), 0)]);
		let mut frontier = vec![focal.to_string()];

		pending.remove(focal);

		'hops: for hops in 1..=plan.max_distance {
			if pending.is_empty() || frontier.is_empty() {
				break;
			}

			let mut next = Vec::new();

			for uuid in &frontier {
				let neighbors =
					self.client.get_edges_for_node(key, uuid, deadline).await.map_err(|err| {
						Error::RerankFailed { message: format!("Traversal from {uuid} failed: {err}") }
					})?;

				for neighbor in neighbors {
					if !can_read(&neighbor.node.namespace, identity)
						|| distances.contains_key(&neighbor.node.uuid)
					{
						continue;
					}
					if distances.len() >= MAX_VISITED {
						tracing::warn!(focal_node = focal, "Focal traversal hit the node cap.");

						break 'hops;
					}

					pending.remove(neighbor.node.uuid.as_str());
					distances.insert(neighbor.node.uuid.clone(), hops);
					next.push(neighbor.node.uuid);
				}
			}

			frontier = next;
		}

		Ok(distances)
	}
}

/// Scores candidates by proximity, `1 / (1 + hops)`, and drops those outside the traversal.
pub(crate) fn by_node_distance(
	candidates: Vec<Candidate>,
	distances: &HashMap<String, u32>,
) -> Vec<Candidate> {
	let mut ranked = candidates
		.into_iter()
		.filter_map(|mut candidate| {
			let hops = *distances.get(&candidate.result.uuid)?;

			candidate.result.score = 1.0 / (1.0 + hops as f32);

			Some(candidate)
		})
		.collect::<Vec<_>>();

	ranked.sort_by(|a, b| cmp_f32_desc(a.result.score, b.result.score));

	ranked
}
