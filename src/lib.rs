//! # dmp-fuota - A Rust Crate for DMP over LoRaWAN FUOTA
//!
//! The dmp-fuota crate carries the DMP device-management protocol between a
//! host tool and constrained LoRaWAN end-devices across two very asymmetric
//! channels: bulk downlink via orchestrator-driven FUOTA multicast
//! deployments, and sparse unicast uplinks pulled from a message-store REST
//! API and reassembled into whole responses.
//!
//! ## Features
//!
//! - Chunk large payloads by profile MTU and ship each chunk as one
//!   multicast deployment, polling per-device fragmentation logs until the
//!   chunk is confirmed
//! - Reassemble out-of-order, duplicated uplink frames into complete DMP
//!   responses matched against the last request's header identity
//! - Nudge quiet class-A devices with a tiny downlink to open uplink
//!   opportunities
//! - Synthesize an upload-write response when a confirmed deployment's
//!   uplink acknowledgment is lost
//! - Static link profiles per multicast class and downlink speed
//!
//! ## Usage
//!
//! ```no_run
//! use dmp_fuota::{init_logger, FuotaTransport, FuotaTransportConfig};
//! use dmp_fuota::fuota::DeploymentDevice;
//!
//! # async fn run() -> Result<(), dmp_fuota::FuotaError> {
//! init_logger();
//! let config = FuotaTransportConfig {
//!     app_id: "42".to_string(),
//!     devices: vec![DeploymentDevice {
//!         dev_eui: "0102030405060708".to_string(),
//!         gen_app_key: "000102030405060708090a0b0c0d0e0f".to_string(),
//!     }],
//!     ..FuotaTransportConfig::default()
//! };
//! let mut transport = FuotaTransport::new(config)?;
//! transport.connect().await?;
//! # let request_bytes: Vec<u8> = Vec::new();
//! let _response = transport.send_and_receive(&request_bytes).await?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod dmp;
pub mod error;
pub mod fuota;
pub mod logging;
pub mod registry;
pub mod transport;
pub mod uplink;

pub use crate::error::FuotaError;
pub use crate::logging::{init_logger, log_info};

// Core transport types
pub use dmp::{DmpHeader, DmpOp, ExpectedResponseIdentity};
pub use fuota::{
    multicast_timeout_seconds, DeploymentDevice, DownlinkReport, DownlinkSpeed, DownlinkStats,
    MulticastClass, Profile, Region,
};
pub use transport::{FuotaTransport, FuotaTransportConfig};
pub use uplink::UplinkFrame;

/// Connect the transport: verify the application and narrow the device
/// fleet.
///
/// # Arguments
/// * `transport` - Transport to connect
///
/// # Returns
/// * `Ok(())` - Connected with at least one matched device
/// * `Err(FuotaError)` - Application unknown or no device matched
pub async fn connect(transport: &mut FuotaTransport) -> Result<(), FuotaError> {
    transport.connect().await
}

/// Disconnect the transport and log the downlink report.
///
/// # Arguments
/// * `transport` - Transport to disconnect
pub async fn disconnect(transport: &mut FuotaTransport) {
    transport.disconnect().await
}

/// Send one DMP request over the appropriate channel.
///
/// # Arguments
/// * `transport` - Connected transport
/// * `data` - Complete DMP frame, header included
///
/// # Returns
/// * `Ok(())` - Request delivered (multicast) or queued (unicast)
/// * `Err(FuotaError)` - Send failed
pub async fn send(transport: &mut FuotaTransport, data: &[u8]) -> Result<(), FuotaError> {
    transport.send(data).await
}

/// Receive the response to the last request.
///
/// # Arguments
/// * `transport` - Connected transport
///
/// # Returns
/// * `Ok(Vec<u8>)` - Complete response frame, header included
/// * `Err(FuotaError)` - No response within the receive window
pub async fn receive(transport: &mut FuotaTransport) -> Result<Vec<u8>, FuotaError> {
    transport.receive().await
}

/// Send one DMP request and wait for its response.
///
/// # Arguments
/// * `transport` - Connected transport
/// * `data` - Complete DMP frame, header included
///
/// # Returns
/// * `Ok(Vec<u8>)` - Response frame, received or synthesized
/// * `Err(FuotaError)` - Exchange failed
pub async fn send_and_receive(
    transport: &mut FuotaTransport,
    data: &[u8],
) -> Result<Vec<u8>, FuotaError> {
    transport.send_and_receive(data).await
}
