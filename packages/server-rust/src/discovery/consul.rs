//! Consul agent API client.
//!
//! Uses blocking queries on `/v1/health/service/{name}`: the `index` query
//! parameter holds the request until the service changes or `wait` elapses,
//! and the response carries the new index in `X-Consul-Index`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::instance::{Instance, Registration};
use super::registry::{RegistryClient, RegistryError, WatchResult};

const INDEX_HEADER: &str = "X-Consul-Index";

/// HTTP client for one Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl ConsulRegistry {
    /// Creates a client for the agent at `base_url` (e.g. `http://127.0.0.1:8500`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn unreachable(err: &reqwest::Error) -> RegistryError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        err.to_string()
    };
    RegistryError::Unreachable(reason)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentCheck>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "HTTP")]
    http: String,
    interval: String,
    timeout: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    service: HealthService,
    #[serde(default)]
    checks: Vec<HealthCheckStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheckStatus {
    status: String,
}

fn consul_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn to_instances(entries: Vec<HealthEntry>) -> Vec<Instance> {
    let mut instances: Vec<Instance> = entries
        .into_iter()
        .map(|entry| {
            let host = if entry.service.address.is_empty() {
                entry.node.address
            } else {
                entry.service.address
            };
            Instance {
                address: format!("{host}:{}", entry.service.port),
                id: entry.service.id,
                healthy: entry.checks.iter().all(|check| check.status == "passing"),
            }
        })
        .collect();
    instances.sort();
    instances
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

#[async_trait]
impl RegistryClient for ConsulRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let body = AgentRegistration {
            id: &registration.id,
            name: &registration.service,
            address: &registration.host,
            port: registration.port,
            check: registration.check.as_ref().map(|check| AgentCheck {
                http: check.url.clone(),
                interval: consul_duration(check.interval),
                timeout: consul_duration(check.timeout),
            }),
        };
        let response = self
            .client
            .put(format!("{}/v1/agent/service/register", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable(&e))?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        let response = self
            .client
            .put(format!(
                "{}/v1/agent/service/deregister/{instance_id}",
                self.base_url
            ))
            .send()
            .await
            .map_err(|e| unreachable(&e))?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn watch(
        &self,
        service: &str,
        after_index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError> {
        let index = after_index.to_string();
        let wait_param = consul_duration(wait);
        // Consul adds up to wait/16 of jitter before answering.
        let timeout = wait + wait / 16 + Duration::from_secs(1);
        let response = self
            .client
            .get(format!("{}/v1/health/service/{service}", self.base_url))
            .query(&[("index", index.as_str()), ("wait", wait_param.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable(&e))?;
        let response = Self::check_status(response).await?;

        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| RegistryError::Decode(format!("missing {INDEX_HEADER} header")))?;
        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(WatchResult {
            index,
            instances: to_instances(entries),
        })
    }
}
