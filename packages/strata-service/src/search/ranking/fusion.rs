use super::cmp_f32_desc;
use crate::search::Candidate;

/// Reciprocal rank fusion over the per-namespace lists a candidate appeared in.
///
/// Each appearance at 1-based rank `r` contributes `1 / (k + r)`. The sort is stable, so equal
/// fused scores keep retrieval order and a second pass is a no-op.
pub(crate) fn reciprocal_rank_fusion(mut candidates: Vec<Candidate>, k: f32) -> Vec<Candidate> {
	for candidate in &mut candidates {
		candidate.result.score = candidate.ranks.iter().map(|rank| 1.0 / (k + *rank as f32)).sum();
	}

	candidates.sort_by(|a, b| cmp_f32_desc(a.result.score, b.result.score));

	candidates
}
