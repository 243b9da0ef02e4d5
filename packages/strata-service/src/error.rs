pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid query: {message}")]
	InvalidQuery { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error(transparent)]
	Namespace(#[from] strata_domain::Error),
	#[error("Access denied: {message}")]
	AccessDenied { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Rerank failed: {message}")]
	RerankFailed { message: String },
	#[error("Graph {operation} timed out after {timeout_ms} ms.")]
	Timeout { operation: &'static str, timeout_ms: u64 },
	#[error("Graph engine error: {message}")]
	Engine { message: String },
}
impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		Self::Engine { message: format!("{err:#}") }
	}
}
