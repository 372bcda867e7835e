//! Scaleway implementation of the provider interface.
//!
//! Server CRUD goes through the zoned Instances HTTP API directly so the
//! request and response payloads carry exactly the fields this crate needs;
//! instance actions (poweron, terminate) and the image catalog go through the
//! `scaleway-rs` SDK.

mod catalog;

use std::sync::LazyLock;
use std::time::Duration;

use scaleway_rs::ScalewayApi;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ScalewayConfig};
use crate::provider::{LaunchRequest, Provider, ProviderError, ProviderFuture, Server};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider backed by the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
}

#[derive(Serialize)]
struct CreateServerPayload {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct ImageRefPayload {
    id: String,
}

#[derive(Clone, Debug, Deserialize)]
struct PublicIpPayload {
    address: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ServerPayload {
    id: String,
    name: String,
    state: String,
    #[serde(default)]
    creation_date: String,
    #[serde(default)]
    image: Option<ImageRefPayload>,
    #[serde(default)]
    public_ip: Option<PublicIpPayload>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ServerPayload,
}

#[derive(Deserialize)]
struct ServerListEnvelope {
    #[serde(default)]
    servers: Vec<ServerPayload>,
}

#[derive(Deserialize)]
struct ApiErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

impl From<ServerPayload> for Server {
    fn from(value: ServerPayload) -> Self {
        Self {
            id: value.id,
            name: value.name,
            image: value.image.map(|image| image.id),
            state: value.state,
            public_address: value.public_ip.map(|ip| ip.address),
            created_at: value.creation_date,
        }
    }
}

impl ScalewayProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
        })
    }

    fn endpoint(&self, tail: &str) -> String {
        format!(
            "{SCALEWAY_INSTANCE_API_BASE}/zones/{}/{tail}",
            self.config.zone
        )
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ProviderError::Api {
            message: err.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorPayload>(&body)
                .ok()
                .and_then(|payload| payload.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(ProviderError::Api {
                message: format!("{status}: {message}"),
            });
        }

        if body.is_empty() {
            return Err(ProviderError::EmptyResponse {
                endpoint: endpoint.to_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|_| ProviderError::EmptyResponse {
            endpoint: endpoint.to_owned(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        tail: &str,
    ) -> Result<T, ProviderError> {
        let url = self.endpoint(tail);
        let response = HTTP_CLIENT
            .get(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .send()
            .await
            .map_err(|err| ProviderError::Api {
                message: err.to_string(),
            })?;
        Self::parse_response(response, tail).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: Serialize + Sync>(
        &self,
        tail: &str,
        payload: &B,
    ) -> Result<T, ProviderError> {
        let url = self.endpoint(tail);
        let response = HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| ProviderError::Api {
                message: err.to_string(),
            })?;
        Self::parse_response(response, tail).await
    }

    async fn fetch_server(&self, server_id: &str) -> Result<Server, ProviderError> {
        let tail = format!("servers/{server_id}");
        let url = self.endpoint(&tail);
        let response = HTTP_CLIENT
            .get(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .send()
            .await
            .map_err(|err| ProviderError::Api {
                message: err.to_string(),
            })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                server_id: server_id.to_owned(),
            });
        }
        let envelope: ServerEnvelope = Self::parse_response(response, &tail).await?;
        Ok(envelope.server.into())
    }
}

impl Provider for ScalewayProvider {
    fn launch_server<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, Server> {
        Box::pin(async move {
            request.validate()?;
            let payload = CreateServerPayload {
                name: request.name.clone(),
                commercial_type: self.config.instance_type.clone(),
                image: request.image.clone(),
                project: self.config.project_id.clone(),
                dynamic_ip_required: true,
                tags: vec![String::from("machinist"), request.series.clone()],
                organization: self.config.organization_id.clone(),
            };
            let envelope: ServerEnvelope = self.post_json("servers", &payload).await?;
            let server = Server::from(envelope.server);

            self.api
                .perform_instance_action_async(&self.config.zone, &server.id, "poweron")
                .await?;

            Ok(server)
        })
    }

    fn get_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, Server> {
        Box::pin(async move { self.fetch_server(server_id).await })
    }

    fn terminate_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.api
                .perform_instance_action_async(&self.config.zone, server_id, "terminate")
                .await?;
            Ok(())
        })
    }

    fn list_servers(&self) -> ProviderFuture<'_, Vec<Server>> {
        Box::pin(async move {
            let envelope: ServerListEnvelope = self.get_json("servers").await?;
            Ok(envelope.servers.into_iter().map(Server::from).collect())
        })
    }

    fn resolve_image<'a>(&'a self, series: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let label = catalog::image_label(series).ok_or_else(|| {
                ProviderError::UnknownSeries {
                    series: series.to_owned(),
                }
            })?;
            let images = scaleway_rs::ScalewayListInstanceImagesBuilder::new(
                self.api.clone(),
                &self.config.zone,
            )
            .public(true)
            .name(label)
            .arch(&self.config.architecture)
            .run_async()
            .await?;
            catalog::select_image_id(
                images,
                label,
                &self.config.architecture,
                &self.config.zone,
            )
        })
    }
}

#[cfg(test)]
mod tests;
