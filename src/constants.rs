//! DMP-over-FUOTA Transport Constants
//!
//! This module defines the fixed wire parameters of the transport: LoRaWAN
//! application ports, multicast deployment defaults, and the cadences of the
//! polling and reassembly loops.

use std::time::Duration;

/// Application port carrying DMP request and response frames
pub const DMP_FPORT: u8 = 2;

/// Application port carrying nudge downlinks
pub const NUDGE_FPORT: u8 = 4;

/// Nudge downlink payload. Never inspected by the device's DMP stack; its
/// only purpose is to open a class-A downlink slot and so solicit an uplink.
pub const NUDGE_PAYLOAD: &[u8] = b"nudge";

/// Multicast downlink frequency in Hz, carried in every deployment.
///
/// NOTE for deployment operators: this is the US915 value and is sent even
/// when `multicast_region` is non-US. Kept verbatim from the deployed
/// behavior; non-US regions rely on the network server overriding it.
pub const MULTICAST_FREQUENCY_HZ: u32 = 923_300_000;

/// Multicast group id used for every deployment
pub const MULTICAST_GROUP_ID: u32 = 0;

/// Fragmentation-status request policy passed to the orchestrator
pub const FRAG_STATUS_POLICY: &str = "AFTER_SESSION_TIMEOUT";

/// Unicast setup attempts per device within a deployment
pub const UNICAST_ATTEMPT_COUNT: u32 = 3;

// ----------------------------------------------------------------------------
// Loop cadences and deadlines
// ----------------------------------------------------------------------------

/// Deployment status poll interval and uplink fetch tick
pub const POLL_TICK: Duration = Duration::from_secs(5);

/// Consecutive quiet ticks before a nudge downlink is queued
pub const NUDGE_QUIET_TICKS: u32 = 4;

/// Per-device wall-clock limit for assembling one response
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(360);

/// Margin subtracted from the send timestamp when fetching uplinks, to
/// tolerate clock skew between this host and the message store
pub const RECEIVE_CLOCK_SKEW_S: i64 = 60;

/// Floor for the per-send deadline in seconds; scaled up with payload size
pub const MIN_SEND_DURATION_S: f64 = 500.0;

/// Guard band added to every multicast session timeout in seconds
pub const SESSION_GUARD_BAND_S: u64 = 60;
