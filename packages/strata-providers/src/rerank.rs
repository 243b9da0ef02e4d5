use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Scores each document against the query with an external cross-encoder.
pub async fn rerank(
	cfg: &strata_config::ProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<f32>> {
	if docs.is_empty() {
		return Ok(Vec::new());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let res = client
		.post(url)
		.headers(crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![0.0_f32; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing results array.".to_string(),
		})?;

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;

		if index < scores.len() {
			scores[index] = score;
		}
	}

	Ok(scores)
}
