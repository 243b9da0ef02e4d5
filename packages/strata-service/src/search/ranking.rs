mod cross_encoder;
mod distance;
mod diversity;
mod fusion;

pub(super) use cross_encoder::sort_by_scores;
pub(super) use distance::by_node_distance;
pub(super) use diversity::maximal_marginal_relevance;
pub(super) use fusion::reciprocal_rank_fusion;

use std::cmp::Ordering;

/// Descending order with NaN last.
pub(crate) fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
