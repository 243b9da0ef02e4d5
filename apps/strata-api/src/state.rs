use std::sync::Arc;

use strata_service::{GraphClient, HttpConnector, StrataService};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<StrataService>,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
}
impl AppState {
	/// Builds the engine adapter and service, then opens the engine connection eagerly so a
	/// misconfigured engine fails startup instead of the first request.
	pub async fn new(config: strata_config::Config) -> color_eyre::Result<Self> {
		let connector = Arc::new(HttpConnector::new(config.graph.clone()));
		let client = Arc::new(GraphClient::from_config(&config.graph, connector));

		client.init().await?;

		let service = StrataService::new(&config, client);

		Ok(Self::from_service(Arc::new(service), &config.security))
	}

	pub fn from_service(service: Arc<StrataService>, security: &strata_config::Security) -> Self {
		Self {
			service,
			api_auth_token: security.api_auth_token.clone(),
			admin_auth_token: security.admin_auth_token.clone(),
		}
	}
}
