//! # Device Registry Client
//!
//! Client for the LoRaWAN network-server registry: application and device
//! lookups used to narrow the configured device list at connect time, and
//! the downlink queue used for unicast DMP requests and nudge frames.

use crate::error::FuotaError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde::Serialize;

/// The registry operations this transport consumes.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// True when the application id exists in the registry.
    async fn application_exists(&self, application_id: &str) -> Result<bool, FuotaError>;

    /// True when the device EUI exists in the registry.
    async fn device_exists(&self, dev_eui: &str) -> Result<bool, FuotaError>;

    /// Queues a class-A downlink for a device.
    async fn enqueue_downlink(
        &self,
        dev_eui: &str,
        f_port: u8,
        payload: &[u8],
    ) -> Result<(), FuotaError>;
}

/// reqwest-backed registry client.
pub struct HttpDeviceRegistry {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiQueueItem<'a> {
    dev_eui: &'a str,
    f_port: u8,
    confirmed: bool,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnqueueDownlink<'a> {
    device_queue_item: ApiQueueItem<'a>,
}

impl HttpDeviceRegistry {
    pub fn new(addr: &str, api_token: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        HttpDeviceRegistry {
            base_url,
            api_token: api_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn auth_value(&self) -> String {
        format!("Bearer {}", self.api_token)
    }

    async fn exists(&self, url: &str) -> Result<bool, FuotaError> {
        let response = self
            .client
            .get(url)
            .header("Grpc-Metadata-Authorization", self.auth_value())
            .send()
            .await
            .map_err(|e| FuotaError::RegistryUnavailable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(FuotaError::RegistryUnavailable(format!(
                "lookup returned {}",
                response.status()
            )));
        }
        Ok(true)
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn application_exists(&self, application_id: &str) -> Result<bool, FuotaError> {
        self.exists(&format!("{}/api/applications/{application_id}", self.base_url))
            .await
    }

    async fn device_exists(&self, dev_eui: &str) -> Result<bool, FuotaError> {
        self.exists(&format!("{}/api/devices/{dev_eui}", self.base_url))
            .await
    }

    async fn enqueue_downlink(
        &self,
        dev_eui: &str,
        f_port: u8,
        payload: &[u8],
    ) -> Result<(), FuotaError> {
        let url = format!("{}/api/devices/{dev_eui}/queue", self.base_url);
        debug!("Queueing {} B downlink for {dev_eui} on fPort {f_port}", payload.len());
        let body = ApiEnqueueDownlink {
            device_queue_item: ApiQueueItem {
                dev_eui,
                f_port,
                confirmed: false,
                data: BASE64.encode(payload),
            },
        };
        let response = self
            .client
            .post(&url)
            .header("Grpc-Metadata-Authorization", self.auth_value())
            .json(&body)
            .send()
            .await
            .map_err(|e| FuotaError::RegistryUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FuotaError::RegistryUnavailable(format!(
                "downlink enqueue returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Validates a configured deployment device: 16 lowercase hex characters of
/// EUI and 32 hex characters of key material.
pub fn validate_device(dev_eui: &str, gen_app_key: &str) -> Result<(), FuotaError> {
    if dev_eui.len() != 16
        || hex::decode(dev_eui).is_err()
        || dev_eui.chars().any(|c| c.is_ascii_uppercase())
    {
        return Err(FuotaError::InvalidConfig(format!(
            "device EUI {dev_eui:?} is not 16 lowercase hex characters"
        )));
    }
    if gen_app_key.len() != 32 || hex::decode(gen_app_key).is_err() {
        return Err(FuotaError::InvalidConfig(format!(
            "key for device {dev_eui} is not 32 hex characters"
        )));
    }
    Ok(())
}
