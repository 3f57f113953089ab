//! # DMP-over-FUOTA Transport
//!
//! This module provides the FuotaTransport struct, the main entry point of
//! the crate: it validates and narrows the configured device fleet at
//! connect time, routes image-upload writes through the multicast send
//! engine, fans every other request out as unicast downlinks, and
//! reassembles the matching response from the uplink stream.

use crate::constants::{DMP_FPORT, RECEIVE_CLOCK_SKEW_S, RECEIVE_TIMEOUT};
use crate::dmp::header::{DmpHeader, ExpectedResponseIdentity};
use crate::dmp::records::{
    encode_upload_write_response, upload_write_offset, CMD_IMAGE_UPLOAD, GROUP_IMAGE_MANAGEMENT,
};
use crate::error::FuotaError;
use crate::fuota::orchestrator::{DeploymentDevice, FuotaOrchestrator, HttpFuotaOrchestrator};
use crate::fuota::profiles::{DownlinkSpeed, MulticastClass, Profile, Region};
use crate::fuota::sender::MulticastSender;
use crate::fuota::stats::{DownlinkReport, DownlinkStats};
use crate::registry::{validate_device, DeviceRegistry, HttpDeviceRegistry};
use crate::uplink::reassembly::UplinkReassembler;
use crate::uplink::store::{MessageStore, TasMessageStore};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

/// Configuration for the transport.
#[derive(Debug, Clone)]
pub struct FuotaTransportConfig {
    /// Multicast class selecting the profile column and timeout formula
    pub multicast_group_type: MulticastClass,
    /// Region passed to the orchestrator; does not alter local behavior
    pub multicast_region: Region,
    /// Speed grade selecting the profile row
    pub downlink_speed: DownlinkSpeed,
    /// Device registry (network server) endpoint
    pub chirpstack_server_addr: String,
    /// Registry and orchestrator API token
    pub api_token: String,
    /// Application scope for deployments and device lookups
    pub app_id: String,
    /// Candidate device fleet; `connect` narrows this to the devices the
    /// registry recognizes
    pub devices: Vec<DeploymentDevice>,
    /// FUOTA orchestrator endpoint
    pub chirpstack_fuota_server_addr: String,
    /// Floor of the per-send deadline in seconds; scaled up with payload
    /// size
    pub send_max_duration_s: f64,
    /// Message-store endpoint
    pub tas_api_addr: String,
    /// Network-server selector within the message store
    pub tas_api_lns_id: String,
}

impl Default for FuotaTransportConfig {
    fn default() -> Self {
        FuotaTransportConfig {
            multicast_group_type: MulticastClass::ClassC,
            multicast_region: Region::Us915,
            downlink_speed: DownlinkSpeed::Slow,
            chirpstack_server_addr: "localhost:8080".to_string(),
            api_token: String::new(),
            app_id: String::new(),
            devices: Vec::new(),
            chirpstack_fuota_server_addr: "localhost:8070".to_string(),
            send_max_duration_s: 500.0,
            tas_api_addr: "localhost:8090".to_string(),
            tas_api_lns_id: String::new(),
        }
    }
}

/// The DMP-over-FUOTA transport.
///
/// One request/response exchange is in flight at a time; the transport does
/// not synchronize internally.
pub struct FuotaTransport {
    config: FuotaTransportConfig,
    registry: Arc<dyn DeviceRegistry>,
    orchestrator: Arc<dyn FuotaOrchestrator>,
    store: Arc<dyn MessageStore>,
    matched_devices: Vec<DeploymentDevice>,
    expected: ExpectedResponseIdentity,
    last_send_time: DateTime<Utc>,
    upload_offset: Option<u64>,
    stats: DownlinkStats,
}

impl FuotaTransport {
    /// Creates a transport with HTTP clients built from the configuration.
    pub fn new(config: FuotaTransportConfig) -> Result<Self, FuotaError> {
        let registry = Arc::new(HttpDeviceRegistry::new(
            &config.chirpstack_server_addr,
            &config.api_token,
        ));
        let orchestrator = Arc::new(HttpFuotaOrchestrator::new(
            &config.chirpstack_fuota_server_addr,
            &config.api_token,
        ));
        let store = Arc::new(TasMessageStore::new(
            &config.tas_api_addr,
            &config.tas_api_lns_id,
        ));
        Self::with_clients(config, registry, orchestrator, store)
    }

    /// Creates a transport over caller-supplied clients.
    pub fn with_clients(
        config: FuotaTransportConfig,
        registry: Arc<dyn DeviceRegistry>,
        orchestrator: Arc<dyn FuotaOrchestrator>,
        store: Arc<dyn MessageStore>,
    ) -> Result<Self, FuotaError> {
        for device in &config.devices {
            validate_device(&device.dev_eui, &device.gen_app_key)?;
        }
        Ok(FuotaTransport {
            config,
            registry,
            orchestrator,
            store,
            matched_devices: Vec::new(),
            expected: ExpectedResponseIdentity::default(),
            last_send_time: Utc::now(),
            upload_offset: None,
            stats: DownlinkStats::new(),
        })
    }

    /// Verifies the application id and narrows the configured devices to
    /// those the registry recognizes. Fails when the application is unknown
    /// or no device matches.
    pub async fn connect(&mut self) -> Result<(), FuotaError> {
        debug!(
            "Connecting to registry at {}",
            self.config.chirpstack_server_addr
        );
        let app_known = self
            .registry
            .application_exists(&self.config.app_id)
            .await
            .map_err(|e| FuotaError::ConnectionRefused(e.to_string()))?;
        if !app_known {
            return Err(FuotaError::ConnectionRefused(format!(
                "application {} not found",
                self.config.app_id
            )));
        }

        let mut matched = Vec::new();
        for device in &self.config.devices {
            match self.registry.device_exists(&device.dev_eui).await {
                Ok(true) => matched.push(device.clone()),
                Ok(false) => warn!("Device {} not found in registry, skipping", device.dev_eui),
                Err(e) => warn!("Device {} lookup failed, skipping: {e}", device.dev_eui),
            }
        }
        if matched.is_empty() {
            return Err(FuotaError::ConnectionRefused(
                "no configured device matched the registry".to_string(),
            ));
        }
        info!(
            "Connected with {} of {} configured device(s)",
            matched.len(),
            self.config.devices.len()
        );
        self.matched_devices = matched;
        self.stats = DownlinkStats::new();
        Ok(())
    }

    /// Drops the matched device fleet and logs the downlink report.
    pub async fn disconnect(&mut self) {
        info!("Disconnecting: {}", self.stats.report());
        self.matched_devices.clear();
    }

    /// Devices that survived connect-time narrowing.
    pub fn matched_devices(&self) -> &[DeploymentDevice] {
        &self.matched_devices
    }

    /// Downlink timing report for the current connection.
    pub fn downlink_report(&self) -> DownlinkReport {
        self.stats.report()
    }

    /// Chunk size of the multicast send engine.
    pub fn mtu(&self) -> usize {
        Profile::lookup(self.config.multicast_group_type, self.config.downlink_speed).mtu
    }

    /// Largest request the transport accepts in one send.
    pub fn max_unencoded_size(&self) -> usize {
        self.mtu()
    }

    /// Sends one DMP request: image-upload writes go out as multicast
    /// deployments, everything else as unicast downlinks to each matched
    /// device.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), FuotaError> {
        let header = DmpHeader::parse(data)?;
        self.expected.group_id = header.group_id;
        self.expected.command_id = header.command_id;

        if header.group_id == GROUP_IMAGE_MANAGEMENT && header.command_id == CMD_IMAGE_UPLOAD {
            let off = upload_write_offset(&data[DmpHeader::SIZE..])?;
            self.upload_offset = Some(off);
            debug!("Upload write at offset {off}, sending multicast");
            let sender = MulticastSender {
                orchestrator: self.orchestrator.as_ref(),
                application_id: &self.config.app_id,
                devices: &self.matched_devices,
                class: self.config.multicast_group_type,
                speed: self.config.downlink_speed,
                region: self.config.multicast_region,
                send_max_duration_s: self.config.send_max_duration_s,
            };
            sender.send(data, &mut self.stats).await
        } else {
            self.upload_offset = None;
            debug!(
                "Queueing {} B unicast request for {} device(s)",
                data.len(),
                self.matched_devices.len()
            );
            for device in &self.matched_devices {
                self.registry
                    .enqueue_downlink(&device.dev_eui, DMP_FPORT, data)
                    .await?;
            }
            Ok(())
        }
    }

    /// Receives the response to the last request, trying each matched
    /// device in turn.
    pub async fn receive(&mut self) -> Result<Vec<u8>, FuotaError> {
        for device in &self.matched_devices {
            let reassembler = UplinkReassembler::new(
                self.store.as_ref(),
                self.registry.as_ref(),
                self.expected,
                DMP_FPORT,
            );
            if let Some(message) = reassembler
                .receive(&device.dev_eui, self.last_send_time, RECEIVE_TIMEOUT)
                .await?
            {
                return Ok(message);
            }
        }
        Err(FuotaError::ReceiveTimeout(format!(
            "no complete response within {} s per device",
            RECEIVE_TIMEOUT.as_secs()
        )))
    }

    /// Sends a request and waits for its response.
    ///
    /// When the request was an image-upload write and the uplink
    /// confirmation is lost, a write response is synthesized from the
    /// request's sequence and offset: a deployment the evaluator accepted
    /// counts as delivered even without the confirmation.
    pub async fn send_and_receive(&mut self, data: &[u8]) -> Result<Vec<u8>, FuotaError> {
        self.last_send_time = Utc::now() - Duration::seconds(RECEIVE_CLOCK_SKEW_S);
        let header = DmpHeader::parse(data)?;
        self.send(data).await?;
        self.expected.sequence = header.sequence;

        match self.receive().await {
            Ok(message) => Ok(message),
            Err(e @ (FuotaError::ReceiveTimeout(_) | FuotaError::MalformedResponse(_))) => {
                match self.upload_offset {
                    Some(off) => {
                        warn!("Receive failed after upload write ({e}); synthesizing response");
                        encode_upload_write_response(header.sequence, off)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}
