//! REST client for the Compute Engine v1 API.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::auth::TokenSource;
use super::{ComputeApi, Instance, InstanceSpec, Operation, OperationStatus};
use crate::error::{BotError, BotResult};

/// Compute Engine client scoped to one project and zone.
pub struct GceClient {
    client: Client,
    base_url: String,
    project_id: String,
    zone: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertInstanceBody<'a> {
    name: &'a str,
    description: &'a str,
    machine_type: String,
    disks: Vec<AttachedDisk<'a>>,
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachedDisk<'a> {
    boot: bool,
    auto_delete: bool,
    #[serde(rename = "type")]
    kind: &'static str,
    initialize_params: DiskInitializeParams<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiskInitializeParams<'a> {
    disk_name: &'a str,
    source_image: &'a str,
}

#[derive(Debug, Serialize)]
struct NetworkInterface {
    network: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    status: OperationStatus,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    error: Option<OperationErrorList>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorList {
    #[serde(default)]
    errors: Vec<OperationErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl From<OperationResource> for Operation {
    fn from(resource: OperationResource) -> Self {
        let errors = resource
            .error
            .map(|list| {
                list.errors
                    .into_iter()
                    .map(|e| if e.message.is_empty() { e.code } else { e.message })
                    .collect()
            })
            .unwrap_or_default();

        Operation {
            name: resource.name,
            status: resource.status,
            target_id: resource.target_id,
            errors,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl GceClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            zone: zone.into(),
            tokens,
        }
    }

    fn zone_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.base_url, self.project_id, self.zone, path
        )
    }

    async fn send(&self, request: RequestBuilder) -> BotResult<Response> {
        let token = self.tokens.token().await?;
        let response = request.bearer_auth(token).send().await?;
        Ok(response)
    }

    /// Turn a non-success response into a provider error carrying Google's message.
    async fn provider_error(response: Response) -> BotError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(body);
        BotError::provider(status.as_u16(), message)
    }

    async fn operation_from(response: Response) -> BotResult<Operation> {
        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }
        let resource: OperationResource = response.json().await?;
        Ok(resource.into())
    }

    fn insert_body<'a>(&self, spec: &'a InstanceSpec) -> InsertInstanceBody<'a> {
        InsertInstanceBody {
            name: &spec.name,
            description: &spec.description,
            machine_type: format!("zones/{}/machineTypes/{}", self.zone, spec.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                kind: "PERSISTENT",
                initialize_params: DiskInitializeParams {
                    disk_name: &spec.disk_name,
                    source_image: &spec.source_image,
                },
            }],
            network_interfaces: vec![NetworkInterface {
                network: "global/networks/default",
            }],
        }
    }
}

#[async_trait]
impl ComputeApi for GceClient {
    #[instrument(skip(self))]
    async fn get_instance(&self, name: &str) -> BotResult<Option<Instance>> {
        let url = self.zone_url(&format!("instances/{name}"));
        let response = self.send(self.client.get(&url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(instance = name, "Instance not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        let instance: Instance = response.json().await?;
        Ok(Some(instance))
    }

    #[instrument(skip(self, spec), fields(instance = %spec.name))]
    async fn insert_instance(&self, spec: &InstanceSpec) -> BotResult<Operation> {
        let url = self.zone_url("instances");
        let body = self.insert_body(spec);
        let response = self.send(self.client.post(&url).json(&body)).await?;
        Self::operation_from(response).await
    }

    #[instrument(skip(self))]
    async fn start_instance(&self, name: &str) -> BotResult<Operation> {
        let url = self.zone_url(&format!("instances/{name}/start"));
        let response = self.send(self.client.post(&url)).await?;
        Self::operation_from(response).await
    }

    #[instrument(skip(self))]
    async fn stop_instance(&self, name: &str) -> BotResult<Operation> {
        let url = self.zone_url(&format!("instances/{name}/stop"));
        let response = self.send(self.client.post(&url)).await?;
        Self::operation_from(response).await
    }

    async fn get_operation(&self, name: &str) -> BotResult<Operation> {
        let url = self.zone_url(&format!("operations/{name}"));
        let response = self.send(self.client.get(&url)).await?;
        Self::operation_from(response).await
    }
}

impl fmt::Debug for GceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GceClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::auth::StaticToken;

    fn client() -> GceClient {
        GceClient::new(
            Client::new(),
            "https://compute.example.test/compute/v1/",
            "mc-server-316300",
            "us-west1-b",
            Arc::new(StaticToken("token".to_string())),
        )
    }

    #[test]
    fn test_zone_url() {
        assert_eq!(
            client().zone_url("instances/mc-server"),
            "https://compute.example.test/compute/v1/projects/mc-server-316300/zones/us-west1-b/instances/mc-server"
        );
    }

    #[test]
    fn test_insert_body_shape() {
        let spec = InstanceSpec {
            name: "mc-server".to_string(),
            description: "A server".to_string(),
            machine_type: "e2-standard-2".to_string(),
            source_image: "projects/ubuntu-os-cloud/global/images/ubuntu".to_string(),
            disk_name: "my-root-pd".to_string(),
        };
        let client = client();
        let body = serde_json::to_value(client.insert_body(&spec)).unwrap();

        assert_eq!(body["machineType"], "zones/us-west1-b/machineTypes/e2-standard-2");
        assert_eq!(body["disks"][0]["autoDelete"], true);
        assert_eq!(body["disks"][0]["boot"], true);
        assert_eq!(body["disks"][0]["type"], "PERSISTENT");
        assert_eq!(body["disks"][0]["initializeParams"]["diskName"], "my-root-pd");
        assert_eq!(body["networkInterfaces"][0]["network"], "global/networks/default");
    }

    #[test]
    fn test_operation_errors_are_collected() {
        let resource: OperationResource = serde_json::from_str(
            r#"{
                "name": "operation-1",
                "status": "DONE",
                "targetId": "4242",
                "error": {"errors": [
                    {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded"},
                    {"code": "ZONE_RESOURCE_POOL_EXHAUSTED"}
                ]}
            }"#,
        )
        .unwrap();

        let op = Operation::from(resource);
        assert!(op.is_done());
        assert_eq!(op.target_id.as_deref(), Some("4242"));
        assert_eq!(
            op.errors,
            vec![
                "Quota 'CPUS' exceeded".to_string(),
                "ZONE_RESOURCE_POOL_EXHAUSTED".to_string()
            ]
        );
    }
}
