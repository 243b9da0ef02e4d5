use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub graph: Graph,
	#[serde(default)]
	pub search: Search,
	pub providers: Providers,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

/// Connection and resource policy for the external graph engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Graph {
	pub api_base: String,
	#[serde(default)]
	pub api_key: Option<String>,
	/// HTTP client timeout. Operation deadlines below are enforced on top of it.
	#[serde(default = "default_http_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_search_timeout_ms")]
	pub search_timeout_ms: u64,
	#[serde(default = "default_add_timeout_ms")]
	pub add_timeout_ms: u64,
	#[serde(default = "default_max_concurrency_per_identity")]
	pub max_concurrency_per_identity: usize,
	#[serde(default = "default_slow_query_ms")]
	pub slow_query_ms: u64,
	#[serde(default = "default_drain_timeout_ms")]
	pub drain_timeout_ms: u64,
	/// The engine answers shortest-path queries itself.
	#[serde(default)]
	pub native_paths: bool,
	/// The engine's community build accepts a namespace filter.
	#[serde(default = "default_true")]
	pub community_group_ids: bool,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Search {
	#[serde(default = "default_limit")]
	pub default_limit: u32,
	#[serde(default = "default_rrf_k")]
	pub rrf_k: f32,
	#[serde(default = "default_mmr_lambda")]
	pub mmr_lambda: f32,
	#[serde(default = "default_max_distance")]
	pub default_max_distance: u32,
	#[serde(default = "default_path_timeout_ms")]
	pub path_timeout_ms: u64,
	#[serde(default = "default_max_path_depth")]
	pub max_path_depth: u32,
	#[serde(default = "default_max_paths")]
	pub max_paths: u32,
	#[serde(default = "default_neighbor_limit")]
	pub neighbor_limit: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			default_limit: default_limit(),
			rrf_k: default_rrf_k(),
			mmr_lambda: default_mmr_lambda(),
			default_max_distance: default_max_distance(),
			path_timeout_ms: default_path_timeout_ms(),
			max_path_depth: default_max_path_depth(),
			max_paths: default_max_paths(),
			neighbor_limit: default_neighbor_limit(),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub rerank: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	#[serde(default = "default_true")]
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
}
impl Default for Security {
	fn default() -> Self {
		Self { bind_localhost_only: true, api_auth_token: None, admin_auth_token: None }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_true() -> bool {
	true
}

fn default_http_timeout_ms() -> u64 {
	30_000
}

fn default_search_timeout_ms() -> u64 {
	10_000
}

fn default_add_timeout_ms() -> u64 {
	300_000
}

fn default_max_concurrency_per_identity() -> usize {
	5
}

fn default_slow_query_ms() -> u64 {
	3_000
}

fn default_drain_timeout_ms() -> u64 {
	10_000
}

fn default_limit() -> u32 {
	10
}

fn default_rrf_k() -> f32 {
	60.0
}

fn default_mmr_lambda() -> f32 {
	0.7
}

fn default_max_distance() -> u32 {
	3
}

fn default_path_timeout_ms() -> u64 {
	5_000
}

fn default_max_path_depth() -> u32 {
	5
}

fn default_max_paths() -> u32 {
	10
}

fn default_neighbor_limit() -> u32 {
	50
}
