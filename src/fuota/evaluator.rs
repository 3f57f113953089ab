//! # Deployment Completion Evaluator
//!
//! Decides from per-device fragmentation logs whether a multicast deployment
//! has delivered its chunk, whether polling should continue, or whether the
//! deployment is beyond saving.

use crate::error::FuotaError;
use crate::fuota::orchestrator::{DeploymentStatus, DeviceDeploymentStatus, LogEvent};
use crate::fuota::stats::DownlinkStats;
use log::{debug, warn};

/// Log-bearing device statuses tolerated without a completion before the
/// deployment is declared failed
const FAILURE_THRESHOLD: u32 = 3;

/// Evaluates one status poll.
///
/// Returns `Ok(true)` when at least one device confirms the full fragment
/// set (recording the deployment in `stats`), `Ok(false)` when polling
/// should continue, and `DeploymentFailed` once more than three log-bearing
/// devices have been evaluated in this poll with none complete.
pub fn evaluate_deployment(
    status: &DeploymentStatus,
    stats: &mut DownlinkStats,
) -> Result<bool, FuotaError> {
    if status.frag_status_completed_at == 0 {
        return Ok(false);
    }

    let mut evaluated = 0u32;
    let mut any_complete = false;
    for device in &status.device_status {
        if let Some(error) = &device.logs_error {
            warn!("No logs for {}: {error}", device.dev_eui);
        }
        if device.logs.is_empty() {
            continue;
        }
        evaluated += 1;
        if device_complete(device) {
            debug!("Device {} confirmed the fragment session", device.dev_eui);
            any_complete = true;
        }
    }

    if any_complete {
        stats.record_deployment(status);
        return Ok(true);
    }
    if evaluated > FAILURE_THRESHOLD {
        return Err(FuotaError::DeploymentFailed(format!(
            "no device completed across {evaluated} device logs"
        )));
    }
    Ok(false)
}

/// Walks one device's log events in order and decides completion.
///
/// The fragment counters accept `received >= sent`: some device firmware
/// over-counts by one received fragment while reporting none missing, and
/// such a session did in fact deliver every fragment. A non-zero
/// `missing_frag` is never complete.
fn device_complete(device: &DeviceDeploymentStatus) -> bool {
    let mut setup_seen = false;
    let mut status_seen = false;
    let mut nb_frag_sent = 0u32;
    let mut nb_frag_received = 0u32;
    let mut missing_frag = 0u32;

    for event in &device.logs {
        match event.command.as_str() {
            "FragSessionSetupReq" => {
                setup_seen = true;
                nb_frag_sent = field_u32(event, "nb_frag");
            }
            // last occurrence wins
            "FragSessionStatusAns" => {
                status_seen = true;
                nb_frag_received = field_u32(event, "nb_frag_received");
                missing_frag = field_u32(event, "missing_frag");
            }
            _ => {}
        }
    }

    setup_seen && status_seen && nb_frag_sent <= nb_frag_received && missing_frag == 0
}

fn field_u32(event: &LogEvent, key: &str) -> u32 {
    event
        .fields
        .get(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
