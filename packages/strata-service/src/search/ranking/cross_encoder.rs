use tokio::time::{self, Instant};

use super::cmp_f32_desc;
use crate::{
	Error, Result, StrataService,
	search::Candidate,
};
use strata_domain::graph::sanitize_score;

impl StrataService {
	/// Scores each candidate's summary (or name, when it has none) against the query. The
	/// provider call is bounded by the caller's deadline when one is set.
	pub(in crate::search) async fn cross_encoder_scores(
		&self,
		query: &str,
		candidates: &[Candidate],
		deadline: Option<Instant>,
	) -> Result<Vec<f32>> {
		let docs = candidates
			.iter()
			.map(|candidate| {
				candidate
					.result
					.summary
					.as_deref()
					.filter(|summary| !summary.trim().is_empty())
					.unwrap_or(&candidate.result.name)
					.to_string()
			})
			.collect::<Vec<_>>();
		let call = self.providers.rerank.rerank(&self.rerank_cfg, query, &docs);
		let outcome = match deadline {
			Some(deadline) => time::timeout_at(deadline, call).await.map_err(|_| {
				Error::RerankFailed {
					message: "Request deadline expired during re-ranking.".to_string(),
				}
			})?,
			None => call.await,
		};
		let scores =
			outcome.map_err(|err| Error::RerankFailed { message: format!("{err:#}") })?;

		if scores.len() != docs.len() {
			return Err(Error::RerankFailed {
				message: format!("Expected {} scores, received {}.", docs.len(), scores.len()),
			});
		}

		Ok(scores)
	}
}

/// Replaces scores positionally and sorts descending; equal scores keep their prior order.
pub(crate) fn sort_by_scores(mut candidates: Vec<Candidate>, scores: &[f32]) -> Vec<Candidate> {
	for (candidate, score) in candidates.iter_mut().zip(scores) {
		candidate.result.score = sanitize_score(*score);
	}

	candidates.sort_by(|a, b| cmp_f32_desc(a.result.score, b.result.score));

	candidates
}
