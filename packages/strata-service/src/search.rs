mod ranking;

use std::{collections::HashMap, time::Duration};

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::{Error, Result, StrataService};
use strata_config::{MAX_FOCAL_DISTANCE, MAX_SEARCH_LIMIT};
use strata_domain::{
	Namespace, RawResult,
	namespace::{self, fallback_chain_with_domains},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
	#[default]
	None,
	Rrf,
	Mmr,
	CrossEncoder,
	NodeDistance,
}
impl RerankMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Rrf => "rrf",
			Self::Mmr => "mmr",
			Self::CrossEncoder => "cross_encoder",
			Self::NodeDistance => "node_distance",
		}
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchRequest {
	pub query: String,
	/// Anonymous callers only see shared namespaces.
	#[serde(default)]
	pub identity: Option<String>,
	#[serde(default)]
	pub namespace: Option<Namespace>,
	#[serde(default)]
	pub limit: Option<u32>,
	#[serde(default)]
	pub rerank_mode: RerankMode,
	#[serde(default)]
	pub focal_node_uuid: Option<String>,
	#[serde(default)]
	pub max_distance: Option<u32>,
	#[serde(default = "default_enable_fallback")]
	pub enable_fallback: bool,
	/// Shared topic graphs searched between the private graph and the global graph.
	#[serde(default)]
	pub domains: Vec<String>,
	#[serde(default)]
	pub timeout_ms: Option<u64>,
}
impl SearchRequest {
	pub fn new(query: impl Into<String>, identity: Option<&str>) -> Self {
		Self {
			query: query.into(),
			identity: identity.map(ToString::to_string),
			namespace: None,
			limit: None,
			rerank_mode: RerankMode::None,
			focal_node_uuid: None,
			max_distance: None,
			enable_fallback: true,
			domains: Vec::new(),
			timeout_ms: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
	pub uuid: String,
	pub name: String,
	pub entity_type: Option<String>,
	pub score: f32,
	pub summary: Option<String>,
	pub properties: Map<String, Value>,
	pub source_namespace: Namespace,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchResponse {
	pub trace_id: uuid::Uuid,
	pub results: Vec<SearchResult>,
	pub total: usize,
	pub query: String,
	pub rerank_mode: RerankMode,
	pub search_time_ms: u64,
	pub fallback_triggered: bool,
	pub namespaces_searched: Vec<Namespace>,
}

/// A retrieved result plus every 1-based position it held in a namespace's result list.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
	pub(crate) result: SearchResult,
	pub(crate) ranks: Vec<u32>,
}

pub(crate) struct SearchPlan {
	query: String,
	identity: Option<String>,
	limit: u32,
	chain: Vec<Namespace>,
	rerank_mode: RerankMode,
	focal_node: Option<String>,
	max_distance: u32,
}

struct Retrieval {
	candidates: Vec<Candidate>,
	namespaces_searched: Vec<Namespace>,
}

impl StrataService {
	/// Searches the namespace chain from most to least specific until `limit` results are found,
	/// then re-ranks the merged list.
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let started = Instant::now();
		let trace_id = uuid::Uuid::new_v4();
		let deadline = req.timeout_ms.map(|ms| started + Duration::from_millis(ms));
		let mut plan = self.plan_search(&req)?;

		if plan.focal_node.is_some() {
			self.authorize_focal_node(&mut plan, deadline).await?;
		}

		let retrieval = self.retrieve(&plan, deadline).await;
		let mut candidates = self.rerank(&plan, retrieval.candidates, deadline).await;

		candidates.truncate(plan.limit as usize);

		let results = candidates.into_iter().map(|candidate| candidate.result).collect::<Vec<_>>();
		let fallback_triggered = retrieval.namespaces_searched.len() > 1;
		let search_time_ms = started.elapsed().as_millis() as u64;

		tracing::info!(
			%trace_id,
			results = results.len(),
			namespaces = retrieval.namespaces_searched.len(),
			rerank_mode = plan.rerank_mode.as_str(),
			search_time_ms,
			"Search finished."
		);

		Ok(SearchResponse {
			trace_id,
			total: results.len(),
			results,
			query: plan.query,
			rerank_mode: plan.rerank_mode,
			search_time_ms,
			fallback_triggered,
			namespaces_searched: retrieval.namespaces_searched,
		})
	}

	fn plan_search(&self, req: &SearchRequest) -> Result<SearchPlan> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidQuery { message: "query must be non-empty.".to_string() });
		}

		let limit = req.limit.unwrap_or(self.search_cfg.default_limit);

		if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
			return Err(Error::InvalidQuery {
				message: format!("limit must be in the range 1-{MAX_SEARCH_LIMIT}."),
			});
		}

		let max_distance = req.max_distance.unwrap_or(self.search_cfg.default_max_distance);

		if !(1..=MAX_FOCAL_DISTANCE).contains(&max_distance) {
			return Err(Error::InvalidQuery {
				message: format!("max_distance must be in the range 1-{MAX_FOCAL_DISTANCE}."),
			});
		}

		let focal_node = req
			.focal_node_uuid
			.as_deref()
			.map(str::trim)
			.filter(|uuid| !uuid.is_empty())
			.map(ToString::to_string);

		if req.rerank_mode == RerankMode::NodeDistance && focal_node.is_none() {
			return Err(Error::InvalidQuery {
				message: "node_distance re-ranking requires focal_node_uuid.".to_string(),
			});
		}

		let identity = req.identity.as_deref();
		let chain = resolve_chain(identity, req.namespace.as_ref(), req.enable_fallback, &req.domains)?;

		Ok(SearchPlan {
			query: query.to_string(),
			identity: identity.map(ToString::to_string),
			limit,
			chain,
			rerank_mode: req.rerank_mode,
			focal_node,
			max_distance,
		})
	}

	/// A focal node in someone else's private graph is refused. One that cannot be looked up is
	/// dropped so retrieval can proceed without it.
	async fn authorize_focal_node(
		&self,
		plan: &mut SearchPlan,
		deadline: Option<Instant>,
	) -> Result<()> {
		let Some(focal) = plan.focal_node.as_deref() else {
			return Ok(());
		};
		let identity = crate::identity_key(plan.identity.as_deref());

		match self.client.get_node(identity, focal, deadline).await {
			Ok(Some(node)) if !can_read(&node.namespace, plan.identity.as_deref()) => {
				Err(Error::AccessDenied {
					message: format!("Focal node {focal} is not readable by this identity."),
				})
			},
			Ok(Some(_)) => Ok(()),
			Ok(None) => {
				tracing::warn!(focal_node = focal, "Focal node not found. Searching without it.");

				plan.focal_node = None;

				Ok(())
			},
			Err(err) => {
				tracing::warn!(
					error = %err,
					focal_node = focal,
					"Focal node lookup failed. Searching without it."
				);

				plan.focal_node = None;

				Ok(())
			},
		}
	}

	async fn retrieve(&self, plan: &SearchPlan, deadline: Option<Instant>) -> Retrieval {
		let identity = crate::identity_key(plan.identity.as_deref());
		let limit = plan.limit as usize;
		let mut candidates: Vec<Candidate> = Vec::with_capacity(limit);
		let mut positions: HashMap<String, usize> = HashMap::new();
		let mut namespaces_searched = Vec::with_capacity(plan.chain.len());

		for namespace in &plan.chain {
			if candidates.len() >= limit {
				break;
			}
			if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
				tracing::warn!(
					namespace = %namespace,
					"Search deadline reached. Returning partial results."
				);

				break;
			}

			let remaining = (limit - candidates.len()) as u32;

			namespaces_searched.push(namespace.clone());

			let results = match self
				.client
				.search(
					identity,
					&plan.query,
					namespace,
					plan.focal_node.as_deref(),
					remaining,
					deadline,
				)
				.await
			{
				Ok(results) => results,
				Err(err) => {
					tracing::warn!(
						error = %err,
						namespace = %namespace,
						"Namespace search failed. Continuing with the next namespace."
					);

					continue;
				},
			};

			tracing::debug!(namespace = %namespace, results = results.len(), "Namespace searched.");

			merge_results(&mut candidates, &mut positions, namespace, results);
		}

		Retrieval { candidates, namespaces_searched }
	}

	async fn rerank(
		&self,
		plan: &SearchPlan,
		candidates: Vec<Candidate>,
		deadline: Option<Instant>,
	) -> Vec<Candidate> {
		if candidates.is_empty() {
			return candidates;
		}

		let reordered = match plan.rerank_mode {
			RerankMode::None => Ok(candidates),
			RerankMode::Rrf => Ok(ranking::reciprocal_rank_fusion(candidates, self.search_cfg.rrf_k)),
			RerankMode::Mmr => {
				Ok(ranking::maximal_marginal_relevance(candidates, self.search_cfg.mmr_lambda))
			},
			RerankMode::CrossEncoder => match self
				.cross_encoder_scores(&plan.query, &candidates, deadline)
				.await
			{
				Ok(scores) => Ok(ranking::sort_by_scores(candidates, &scores)),
				Err(err) => Err((err, candidates)),
			},
			RerankMode::NodeDistance => {
				match self.focal_distances(plan, &candidates, deadline).await {
					Ok(distances) => Ok(ranking::by_node_distance(candidates, &distances)),
					Err(err) => Err((err, candidates)),
				}
			},
		};

		match reordered {
			Ok(reordered) => reordered,
			Err((err, candidates)) => {
				tracing::warn!(
					error = %err,
					rerank_mode = plan.rerank_mode.as_str(),
					"Re-ranking failed. Keeping retrieval order."
				);

				candidates
			},
		}
	}
}

/// The ordered namespaces one search visits.
///
/// With fallback enabled, a requested namespace is searched first and the identity's default
/// chain follows. Without fallback only one namespace is searched: the requested one, else the
/// caller's private graph, else the global graph.
pub fn resolve_chain(
	identity: Option<&str>,
	requested: Option<&Namespace>,
	enable_fallback: bool,
	domains: &[String],
) -> Result<Vec<Namespace>> {
	if let Some(identity) = identity {
		namespace::user_namespace(identity)?;
	}
	if let Some(requested) = requested
		&& !can_read(requested, identity)
	{
		return Err(Error::AccessDenied {
			message: format!("Namespace {requested} is not readable by this identity."),
		});
	}

	if !enable_fallback {
		let namespace = match (requested, identity) {
			(Some(requested), _) => requested.clone(),
			(None, Some(identity)) => namespace::user_namespace(identity)?,
			(None, None) => namespace::global(),
		};

		return Ok(vec![namespace]);
	}

	let base = fallback_chain_with_domains(identity, domains)?;
	let Some(requested) = requested else {
		return Ok(base);
	};
	let mut chain = Vec::with_capacity(base.len() + 1);

	chain.push(requested.clone());
	chain.extend(base.into_iter().filter(|namespace| namespace != requested));

	Ok(chain)
}

pub(crate) fn can_read(namespace: &Namespace, identity: Option<&str>) -> bool {
	match identity {
		Some(identity) => namespace::validate_access(namespace, identity),
		None => !namespace.is_private(),
	}
}

/// Appends unseen results in order; repeats only record their rank for fusion.
fn merge_results(
	candidates: &mut Vec<Candidate>,
	positions: &mut HashMap<String, usize>,
	namespace: &Namespace,
	results: Vec<RawResult>,
) {
	for (index, raw) in results.into_iter().enumerate() {
		let rank = index as u32 + 1;

		if let Some(&position) = positions.get(&raw.uuid) {
			candidates[position].ranks.push(rank);

			continue;
		}

		positions.insert(raw.uuid.clone(), candidates.len());
		candidates.push(Candidate {
			result: SearchResult {
				uuid: raw.uuid,
				name: raw.name,
				entity_type: raw.entity_type,
				score: raw.score,
				summary: raw.summary,
				properties: raw.properties,
				source_namespace: namespace.clone(),
			},
			ranks: vec![rank],
		});
	}
}

fn default_enable_fallback() -> bool {
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw(uuid: &str, score: f32) -> RawResult {
		RawResult::new(uuid, uuid.to_uppercase(), score)
	}

	#[test]
	fn merge_keeps_first_occurrence_and_records_ranks() {
		let mut candidates = Vec::new();
		let mut positions = HashMap::new();
		let user = namespace::user_namespace("alice").expect("namespace");

		merge_results(&mut candidates, &mut positions, &user, vec![raw("a", 0.9), raw("b", 0.8)]);
		merge_results(
			&mut candidates,
			&mut positions,
			&Namespace::Global,
			vec![raw("b", 0.99), raw("c", 0.5)],
		);

		let uuids = candidates.iter().map(|c| c.result.uuid.as_str()).collect::<Vec<_>>();

		assert_eq!(uuids, vec!["a", "b", "c"]);
		assert_eq!(candidates[1].result.source_namespace, user);
		assert_eq!(candidates[1].result.score, 0.8);
		assert_eq!(candidates[1].ranks, vec![2, 1]);
		assert_eq!(candidates[2].result.source_namespace, Namespace::Global);
	}

	#[test]
	fn requested_namespace_leads_the_chain() {
		let domain = namespace::domain_namespace("ai").expect("namespace");
		let chain = resolve_chain(Some("alice"), Some(&domain), true, &[]).expect("chain");
		let rendered = chain.iter().map(ToString::to_string).collect::<Vec<_>>();

		assert_eq!(rendered, vec!["domain:ai", "user:alice", "global"]);
	}

	#[test]
	fn requested_namespace_is_not_repeated() {
		let chain = resolve_chain(Some("alice"), Some(&Namespace::Global), true, &[]).expect("chain");
		let rendered = chain.iter().map(ToString::to_string).collect::<Vec<_>>();

		assert_eq!(rendered, vec!["global", "user:alice"]);
	}

	#[test]
	fn disabled_fallback_searches_one_namespace() {
		assert_eq!(
			resolve_chain(Some("alice"), None, false, &[]).expect("chain"),
			vec![Namespace::User("alice".to_string())]
		);
		assert_eq!(resolve_chain(None, None, false, &[]).expect("chain"), vec![Namespace::Global]);
	}

	#[test]
	fn foreign_private_namespace_is_denied() {
		let bob = namespace::user_namespace("bob").expect("namespace");

		assert!(matches!(
			resolve_chain(Some("alice"), Some(&bob), true, &[]),
			Err(Error::AccessDenied { .. })
		));
		assert!(matches!(
			resolve_chain(None, Some(&bob), false, &[]),
			Err(Error::AccessDenied { .. })
		));
	}

	#[test]
	fn invalid_identity_is_rejected() {
		assert!(matches!(
			resolve_chain(Some(""), None, true, &[]),
			Err(Error::Namespace(strata_domain::Error::InvalidIdentity { .. }))
		));
	}

	#[test]
	fn request_defaults_enable_fallback() {
		let req: SearchRequest =
			serde_json::from_value(serde_json::json!({ "query": "graphs" })).expect("request");

		assert!(req.enable_fallback);
		assert_eq!(req.rerank_mode, RerankMode::None);
		assert!(req.domains.is_empty());
	}
}
