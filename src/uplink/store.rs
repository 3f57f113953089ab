//! # Uplink Message Store Client
//!
//! Read-only view of the message-store REST API: resolve a device id by its
//! radio EUI, then fetch that device's uplinks filtered by port and capture
//! time. The capture cursor is encoded as an ISO-8601 Z timestamp truncated
//! to seconds; URL encoding is handled by the query serializer.

use crate::error::FuotaError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

/// One uplink radio frame as returned by the message store.
///
/// The timestamp is unique per device within a session and serves as the
/// deduplication key; `f_cnt` is the total ordering key for reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UplinkFrame {
    pub timestamp: String,
    #[serde(rename = "fCnt")]
    pub f_cnt: u32,
    /// Frame payload, base64-encoded
    pub payload: String,
}

/// The two message-store operations this transport consumes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Resolves the store's device id for a radio EUI.
    async fn resolve_device_id(&self, dev_eui: &str) -> Result<String, FuotaError>;

    /// Fetches uplinks on `f_port` captured after `after`, oldest first as
    /// the server returns them; ordering is not guaranteed.
    async fn uplinks_after(
        &self,
        device_id: &str,
        f_port: u8,
        after: DateTime<Utc>,
    ) -> Result<Vec<UplinkFrame>, FuotaError>;
}

/// reqwest-backed client for the TAS message-store REST API.
pub struct TasMessageStore {
    base_url: String,
    lns_id: String,
    client: reqwest::Client,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiDeviceList {
    devices: Vec<ApiDevice>,
}

#[derive(Deserialize)]
struct ApiDevice {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiMessageList {
    messages: Vec<UplinkFrame>,
}

impl TasMessageStore {
    pub fn new(addr: &str, lns_id: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        TasMessageStore {
            base_url,
            lns_id: lns_id.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// ISO-8601 Z, truncated to seconds.
fn capture_cursor(after: DateTime<Utc>) -> String {
    after.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[async_trait]
impl MessageStore for TasMessageStore {
    async fn resolve_device_id(&self, dev_eui: &str) -> Result<String, FuotaError> {
        let url = format!("{}/api/lns/{}/devices", self.base_url, self.lns_id);
        let response = self
            .client
            .get(&url)
            .query(&[("devEui", dev_eui)])
            .send()
            .await
            .map_err(|e| FuotaError::MessageStoreUnavailable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FuotaError::DeviceNotFound(dev_eui.to_string()));
        }
        if !response.status().is_success() {
            return Err(FuotaError::MessageStoreUnavailable(format!(
                "device lookup returned {}",
                response.status()
            )));
        }
        let list: ApiDeviceList = response
            .json()
            .await
            .map_err(|e| FuotaError::MessageStoreUnavailable(e.to_string()))?;
        match list.devices.into_iter().next() {
            Some(device) => Ok(device.id),
            None => Err(FuotaError::DeviceNotFound(dev_eui.to_string())),
        }
    }

    async fn uplinks_after(
        &self,
        device_id: &str,
        f_port: u8,
        after: DateTime<Utc>,
    ) -> Result<Vec<UplinkFrame>, FuotaError> {
        let url = format!("{}/api/devices/{device_id}/messages", self.base_url);
        let cursor = capture_cursor(after);
        let port = f_port.to_string();
        debug!("Fetching uplinks for {device_id} on fPort {f_port} after {cursor}");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("type", "uplink"),
                ("fPort", port.as_str()),
                ("capturedAfter", cursor.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FuotaError::MessageStoreUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FuotaError::MessageStoreUnavailable(format!(
                "message fetch returned {}",
                response.status()
            )));
        }
        let list: ApiMessageList = response
            .json()
            .await
            .map_err(|e| FuotaError::MessageStoreUnavailable(e.to_string()))?;
        Ok(list.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn capture_cursor_truncates_to_seconds() {
        let after = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 45).unwrap()
            + chrono::Duration::milliseconds(987);
        assert_eq!(capture_cursor(after), "2024-03-05T12:30:45Z");
    }
}
