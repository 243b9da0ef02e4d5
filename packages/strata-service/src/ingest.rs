use std::sync::Arc;

use serde_json::{Map, Value};

use crate::{Error, Result, StrataService};
use strata_domain::{Namespace, namespace};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AddContentRequest {
	pub content: String,
	/// Defaults to the caller's private graph.
	#[serde(default)]
	pub namespace: Option<Namespace>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AddContentResponse {
	pub episode_uuid: String,
	pub namespace: Namespace,
	pub node_count: u32,
	pub edge_count: u32,
}

impl StrataService {
	/// Ingests text into a namespace the caller may write to.
	pub async fn add_content(
		&self,
		identity: &str,
		req: AddContentRequest,
	) -> Result<AddContentResponse> {
		if req.content.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "content must be non-empty.".to_string() });
		}

		let namespace = match req.namespace {
			Some(namespace) => namespace,
			None => namespace::user_namespace(identity)?,
		};

		if !namespace::is_owned_by(&namespace, identity) {
			return Err(Error::AccessDenied {
				message: format!("Namespace {namespace} is not writable by this identity."),
			});
		}

		let receipt = self.client.add_content(identity, &req.content, &namespace, &req.metadata).await?;

		tracing::info!(
			episode_uuid = %receipt.episode_uuid,
			namespace = %receipt.namespace,
			nodes = receipt.node_count,
			edges = receipt.edge_count,
			"Content ingested."
		);

		Ok(AddContentResponse {
			episode_uuid: receipt.episode_uuid,
			namespace: receipt.namespace,
			node_count: receipt.node_count,
			edge_count: receipt.edge_count,
		})
	}

	/// Starts a community rebuild in the background and returns immediately.
	pub fn spawn_community_rebuild(self: &Arc<Self>, namespaces: Vec<Namespace>) {
		let service = Arc::clone(self);

		tokio::spawn(async move {
			service.client.rebuild_communities(&namespaces).await;
		});
	}
}
