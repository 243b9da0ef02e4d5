mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Graph, ProviderConfig, Providers, Search, Security, Service};

use std::{fs, path::Path};

pub const MAX_SEARCH_LIMIT: u32 = 100;
pub const MAX_FOCAL_DISTANCE: u32 = 5;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Parses and validates an in-memory TOML document.
pub fn from_toml_str(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw).map_err(|err| Error::ParseConfig {
		path: Path::new("<inline>").to_path_buf(),
		source: err,
	})?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("service.http_bind", &cfg.service.http_bind),
		("service.admin_bind", &cfg.service.admin_bind),
		("graph.api_base", &cfg.graph.api_base),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	for (label, value) in [
		("graph.timeout_ms", cfg.graph.timeout_ms),
		("graph.search_timeout_ms", cfg.graph.search_timeout_ms),
		("graph.add_timeout_ms", cfg.graph.add_timeout_ms),
		("graph.slow_query_ms", cfg.graph.slow_query_ms),
		("search.path_timeout_ms", cfg.search.path_timeout_ms),
		("providers.rerank.timeout_ms", cfg.providers.rerank.timeout_ms),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.graph.max_concurrency_per_identity == 0 {
		return Err(Error::Validation {
			message: "graph.max_concurrency_per_identity must be greater than zero.".to_string(),
		});
	}
	if !(1..=MAX_SEARCH_LIMIT).contains(&cfg.search.default_limit) {
		return Err(Error::Validation {
			message: format!("search.default_limit must be in the range 1-{MAX_SEARCH_LIMIT}."),
		});
	}
	if !cfg.search.rrf_k.is_finite() || cfg.search.rrf_k <= 0.0 {
		return Err(Error::Validation {
			message: "search.rrf_k must be a finite number greater than zero.".to_string(),
		});
	}
	if !cfg.search.mmr_lambda.is_finite() || !(0.0..=1.0).contains(&cfg.search.mmr_lambda) {
		return Err(Error::Validation {
			message: "search.mmr_lambda must be in the range 0.0-1.0.".to_string(),
		});
	}
	if !(1..=MAX_FOCAL_DISTANCE).contains(&cfg.search.default_max_distance) {
		return Err(Error::Validation {
			message: format!(
				"search.default_max_distance must be in the range 1-{MAX_FOCAL_DISTANCE}."
			),
		});
	}
	if cfg.search.max_path_depth == 0 {
		return Err(Error::Validation {
			message: "search.max_path_depth must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_paths == 0 {
		return Err(Error::Validation {
			message: "search.max_paths must be greater than zero.".to_string(),
		});
	}
	if cfg.search.neighbor_limit == 0 {
		return Err(Error::Validation {
			message: "search.neighbor_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.rerank.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider rerank api_key must be non-empty.".to_string(),
		});
	}

	for (key, value) in
		cfg.graph.default_headers.iter().chain(cfg.providers.rerank.default_headers.iter())
	{
		if !value.is_string() {
			return Err(Error::Validation {
				message: format!("Default header {key} must be a string."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.graph.api_base = cfg.graph.api_base.trim_end_matches('/').to_string();

	if cfg.graph.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.graph.api_key = None;
	}
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}
}
