use std::collections::HashSet;

use super::cmp_f32_desc;
use crate::search::Candidate;

/// Greedy maximal marginal relevance over categorical entity types.
///
/// Relevance is the retrieval score normalized by the best score. A candidate is redundant when
/// an already selected candidate shares its entity type; untyped candidates are never redundant.
/// Scores are left as retrieved; only the order changes.
pub(crate) fn maximal_marginal_relevance(candidates: Vec<Candidate>, lambda: f32) -> Vec<Candidate> {
	if candidates.len() <= 1 {
		return candidates;
	}

	let max_score = candidates.iter().map(|candidate| candidate.result.score).fold(0.0_f32, f32::max);
	let relevance = candidates
		.iter()
		.map(|candidate| {
			if max_score > 0.0 { candidate.result.score / max_score } else { 0.0 }
		})
		.collect::<Vec<_>>();
	let mut remaining = (0..candidates.len()).collect::<Vec<_>>();
	let mut order = Vec::with_capacity(candidates.len());
	let mut selected_types = HashSet::new();

	// Ties resolve to the earlier retrieval position, so the first pick is the top score.
	remaining.sort_by(|a, b| cmp_f32_desc(relevance[*a], relevance[*b]).then(a.cmp(b)));

	while !remaining.is_empty() {
		let mut best_slot = 0;
		let mut best_value = f32::NEG_INFINITY;

		for (slot, index) in remaining.iter().enumerate() {
			let redundant = candidates[*index]
				.result
				.entity_type
				.as_deref()
				.is_some_and(|entity_type| selected_types.contains(entity_type));
			let similarity = if redundant { 1.0 } else { 0.0 };
			let value = lambda * relevance[*index] - (1.0 - lambda) * similarity;

			if value > best_value {
				best_value = value;
				best_slot = slot;
			}
		}

		let index = remaining.remove(best_slot);

		if let Some(entity_type) = candidates[index].result.entity_type.as_deref() {
			selected_types.insert(entity_type.to_string());
		}

		order.push(index);
	}

	let mut slots = candidates.into_iter().map(Some).collect::<Vec<_>>();

	order.into_iter().filter_map(|index| slots[index].take()).collect()
}
