//! # FUOTA Orchestrator Client Facade
//!
//! A narrow view of the external FUOTA orchestrator: create a multicast
//! deployment, fetch its status, fetch per-device fragmentation logs. The
//! facade converts the REST gateway's RFC3339 timestamps into epoch seconds
//! so the rest of the crate only does integer arithmetic.

use crate::constants::{FRAG_STATUS_POLICY, MULTICAST_FREQUENCY_HZ, MULTICAST_GROUP_ID};
use crate::error::FuotaError;
use crate::fuota::profiles::{MulticastClass, Region};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::DateTime;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A device enrolled in a multicast deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDevice {
    /// Radio EUI, 16 lowercase hex characters
    pub dev_eui: String,
    /// Multicast root key material, 32 hex characters
    pub gen_app_key: String,
}

/// Everything the orchestrator needs to run one multicast deployment.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub application_id: String,
    pub devices: Vec<DeploymentDevice>,
    pub multicast_class: MulticastClass,
    pub multicast_dr: u8,
    pub region: Region,
    pub payload: Vec<u8>,
    /// Multicast session timeout exponent from the profile
    pub multicast_timeout: u32,
    pub unicast_timeout_s: u64,
    pub fragment_size: u32,
    pub redundancy: u32,
    pub ping_slot_period: u32,
    pub unicast_attempt_count: u32,
}

/// One device-side fragmentation log event.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEvent {
    pub command: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Per-device view within a deployment status, enriched by the sender with
/// that device's log events (or the error that prevented fetching them).
#[derive(Debug, Clone, Default)]
pub struct DeviceDeploymentStatus {
    pub dev_eui: String,
    pub logs: Vec<LogEvent>,
    pub logs_error: Option<String>,
}

/// Deployment lifecycle timestamps in epoch seconds; zero means the stage
/// has not completed yet.
#[derive(Debug, Clone, Default)]
pub struct DeploymentStatus {
    pub mc_group_setup_completed_at: i64,
    pub enqueue_completed_at: i64,
    pub frag_status_completed_at: i64,
    pub device_status: Vec<DeviceDeploymentStatus>,
}

/// The three orchestrator operations this transport consumes.
#[async_trait]
pub trait FuotaOrchestrator: Send + Sync {
    /// Creates a deployment and returns its id.
    async fn create_deployment(&self, request: &DeploymentRequest) -> Result<String, FuotaError>;

    /// Fetches the lifecycle status of a deployment.
    async fn deployment_status(&self, deployment_id: &str) -> Result<DeploymentStatus, FuotaError>;

    /// Fetches the fragmentation log events of one device in a deployment.
    async fn device_logs(
        &self,
        deployment_id: &str,
        dev_eui: &str,
    ) -> Result<Vec<LogEvent>, FuotaError>;
}

/// reqwest-backed orchestrator client against the FUOTA server REST gateway.
pub struct HttpFuotaOrchestrator {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDeploymentDevice<'a> {
    dev_eui: &'a str,
    gen_app_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDeployment<'a> {
    application_id: &'a str,
    devices: Vec<ApiDeploymentDevice<'a>>,
    multicast_group_type: &'static str,
    multicast_dr: u8,
    multicast_frequency: u32,
    multicast_group_id: u32,
    multicast_region: &'static str,
    multicast_timeout: u32,
    unicast_timeout: String,
    unicast_attempt_count: u32,
    fragmentation_fragment_size: u32,
    fragmentation_redundancy: u32,
    request_fragmentation_session_status: &'static str,
    multicast_ping_slot_period: u32,
    payload: String,
}

#[derive(Serialize)]
struct ApiCreateDeployment<'a> {
    deployment: ApiDeployment<'a>,
}

#[derive(Deserialize)]
struct ApiCreateDeploymentResponse {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ApiDeploymentStatus {
    mc_group_setup_completed_at: Option<String>,
    enqueue_completed_at: Option<String>,
    frag_status_completed_at: Option<String>,
    device_status: Vec<ApiDeviceStatus>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ApiDeviceStatus {
    dev_eui: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiDeviceLogs {
    logs: Vec<LogEvent>,
}

/// Extracts the error detail from a gateway response, which carries a JSON
/// body with a `message` field on failures.
async fn error_detail(context: &str, response: reqwest::Response) -> FuotaError {
    let status = response.status();
    let detail = match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("message")
            .and_then(|message| message.as_str())
            .map(str::to_string),
        Err(_) => None,
    };
    FuotaError::OrchestratorUnavailable(match detail {
        Some(message) => format!("{context} returned {status}: {message}"),
        None => format!("{context} returned {status}"),
    })
}

/// Converts an optional RFC3339 timestamp into epoch seconds, zero when the
/// stage is still pending.
fn epoch_seconds(timestamp: &Option<String>) -> i64 {
    timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp())
        .unwrap_or(0)
}

fn base_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{addr}")
    }
}

impl HttpFuotaOrchestrator {
    pub fn new(addr: &str, api_token: &str) -> Self {
        HttpFuotaOrchestrator {
            base_url: base_url(addr),
            api_token: api_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn auth_value(&self) -> String {
        format!("Bearer {}", self.api_token)
    }
}

#[async_trait]
impl FuotaOrchestrator for HttpFuotaOrchestrator {
    async fn create_deployment(&self, request: &DeploymentRequest) -> Result<String, FuotaError> {
        let body = ApiCreateDeployment {
            deployment: ApiDeployment {
                application_id: &request.application_id,
                devices: request
                    .devices
                    .iter()
                    .map(|device| ApiDeploymentDevice {
                        dev_eui: &device.dev_eui,
                        gen_app_key: &device.gen_app_key,
                    })
                    .collect(),
                multicast_group_type: request.multicast_class.wire_name(),
                multicast_dr: request.multicast_dr,
                multicast_frequency: MULTICAST_FREQUENCY_HZ,
                multicast_group_id: MULTICAST_GROUP_ID,
                multicast_region: request.region.wire_name(),
                multicast_timeout: request.multicast_timeout,
                unicast_timeout: format!("{}s", request.unicast_timeout_s),
                unicast_attempt_count: request.unicast_attempt_count,
                fragmentation_fragment_size: request.fragment_size,
                fragmentation_redundancy: request.redundancy,
                request_fragmentation_session_status: FRAG_STATUS_POLICY,
                multicast_ping_slot_period: request.ping_slot_period,
                payload: BASE64.encode(&request.payload),
            },
        };
        let url = format!("{}/api/deployments", self.base_url);
        debug!(
            "Creating deployment for {} device(s), {} B payload",
            request.devices.len(),
            request.payload.len()
        );
        let response = self
            .client
            .post(&url)
            .header("Grpc-Metadata-Authorization", self.auth_value())
            .json(&body)
            .send()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error_detail("create deployment", response).await);
        }
        let created: ApiCreateDeploymentResponse = response
            .json()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        Ok(created.id)
    }

    async fn deployment_status(&self, deployment_id: &str) -> Result<DeploymentStatus, FuotaError> {
        let url = format!("{}/api/deployments/{deployment_id}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Grpc-Metadata-Authorization", self.auth_value())
            .send()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error_detail("deployment status", response).await);
        }
        let status: ApiDeploymentStatus = response
            .json()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        Ok(DeploymentStatus {
            mc_group_setup_completed_at: epoch_seconds(&status.mc_group_setup_completed_at),
            enqueue_completed_at: epoch_seconds(&status.enqueue_completed_at),
            frag_status_completed_at: epoch_seconds(&status.frag_status_completed_at),
            device_status: status
                .device_status
                .into_iter()
                .map(|device| DeviceDeploymentStatus {
                    dev_eui: device.dev_eui,
                    logs: Vec::new(),
                    logs_error: None,
                })
                .collect(),
        })
    }

    async fn device_logs(
        &self,
        deployment_id: &str,
        dev_eui: &str,
    ) -> Result<Vec<LogEvent>, FuotaError> {
        let url = format!("{}/api/deployments/{deployment_id}/logs", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Grpc-Metadata-Authorization", self.auth_value())
            .query(&[("devEui", dev_eui)])
            .send()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error_detail("device logs", response).await);
        }
        let logs: ApiDeviceLogs = response
            .json()
            .await
            .map_err(|e| FuotaError::OrchestratorUnavailable(e.to_string()))?;
        Ok(logs.logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_handles_pending_and_set_stages() {
        assert_eq!(epoch_seconds(&None), 0);
        assert_eq!(
            epoch_seconds(&Some("1970-01-01T00:10:00Z".to_string())),
            600
        );
        assert_eq!(epoch_seconds(&Some("not a timestamp".to_string())), 0);
    }

    #[test]
    fn base_url_accepts_bare_and_prefixed_addresses() {
        assert_eq!(base_url("localhost:8070"), "http://localhost:8070");
        assert_eq!(base_url("https://fuota.example/"), "https://fuota.example");
    }
}
