//! # Chunked Multicast Sender
//!
//! Splits a payload into MTU-sized chunks and ships each chunk as one
//! orchestrator deployment: create, wait out the multicast session window,
//! then poll status (enriched with per-device logs) until the completion
//! evaluator accepts it or the send deadline expires.

use crate::constants::{MIN_SEND_DURATION_S, POLL_TICK, UNICAST_ATTEMPT_COUNT};
use crate::error::FuotaError;
use crate::fuota::evaluator::evaluate_deployment;
use crate::fuota::orchestrator::{
    DeploymentDevice, DeploymentRequest, DeploymentStatus, FuotaOrchestrator,
};
use crate::fuota::profiles::{
    multicast_timeout_seconds, DownlinkSpeed, MulticastClass, Profile, Region,
};
use crate::fuota::stats::DownlinkStats;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Per-send view over the orchestrator and the deployment parameters.
pub struct MulticastSender<'a> {
    pub orchestrator: &'a dyn FuotaOrchestrator,
    pub application_id: &'a str,
    pub devices: &'a [DeploymentDevice],
    pub class: MulticastClass,
    pub speed: DownlinkSpeed,
    pub region: Region,
    /// Configured floor of the per-send deadline in seconds
    pub send_max_duration_s: f64,
}

impl<'a> MulticastSender<'a> {
    /// Sends `payload` as consecutive multicast deployments.
    pub async fn send(&self, payload: &[u8], stats: &mut DownlinkStats) -> Result<(), FuotaError> {
        let profile = Profile::lookup(self.class, self.speed);
        let started = Instant::now();
        let max_duration_s = self
            .send_max_duration_s
            .max(MIN_SEND_DURATION_S)
            .max(MIN_SEND_DURATION_S * payload.len() as f64 / profile.mtu as f64);
        let chunk_count = payload.len().div_ceil(profile.mtu);
        info!(
            "Sending {} B as {chunk_count} multicast chunk(s) of up to {} B",
            payload.len(),
            profile.mtu
        );

        for (index, chunk) in payload.chunks(profile.mtu).enumerate() {
            let deployment_id = self
                .orchestrator
                .create_deployment(&self.deployment_request(profile, chunk))
                .await?;
            debug!(
                "Created deployment {deployment_id} for chunk {}/{chunk_count}",
                index + 1
            );

            let quiet_s = multicast_timeout_seconds(self.class, self.speed);
            debug!("Waiting {quiet_s} s for the multicast session window");
            sleep(Duration::from_secs(quiet_s)).await;

            loop {
                match self.enriched_status(&deployment_id).await {
                    Ok(status) => {
                        if evaluate_deployment(&status, stats)? {
                            info!("Deployment {deployment_id} completed");
                            break;
                        }
                    }
                    // The matching write-response uplink can still confirm
                    // delivery, so an unreachable orchestrator does not fail
                    // the send.
                    Err(e) => {
                        warn!("Status poll for {deployment_id} failed: {e}; deferring to the uplink confirmation");
                        break;
                    }
                }
                let elapsed_s = started.elapsed().as_secs_f64();
                if elapsed_s > max_duration_s {
                    return Err(FuotaError::DeploymentTimeout {
                        elapsed_s: elapsed_s as u64,
                        max_s: max_duration_s as u64,
                    });
                }
                sleep(POLL_TICK).await;
            }
        }

        let elapsed_s = started.elapsed().as_secs_f64();
        if elapsed_s > 0.0 {
            info!(
                "Sent {} B in {elapsed_s:.0} s ({:.1} B/s effective)",
                payload.len(),
                payload.len() as f64 / elapsed_s
            );
        }
        Ok(())
    }

    /// Fetches the deployment status and attaches each device's logs, or the
    /// error that prevented fetching them, to its status entry.
    async fn enriched_status(&self, deployment_id: &str) -> Result<DeploymentStatus, FuotaError> {
        let mut status = self.orchestrator.deployment_status(deployment_id).await?;
        for device in &mut status.device_status {
            match self
                .orchestrator
                .device_logs(deployment_id, &device.dev_eui)
                .await
            {
                Ok(logs) => device.logs = logs,
                Err(e) => {
                    warn!("Fetching logs for {} failed: {e}", device.dev_eui);
                    device.logs_error = Some(e.to_string());
                }
            }
        }
        Ok(status)
    }

    fn deployment_request(&self, profile: &Profile, chunk: &[u8]) -> DeploymentRequest {
        DeploymentRequest {
            application_id: self.application_id.to_string(),
            devices: self.devices.to_vec(),
            multicast_class: self.class,
            multicast_dr: profile.multicast_dr,
            region: self.region,
            payload: chunk.to_vec(),
            multicast_timeout: profile.multicast_timeout_exponent,
            unicast_timeout_s: profile.unicast_timeout_s,
            fragment_size: profile.fragment_size,
            redundancy: profile.redundancy,
            ping_slot_period: profile.ping_slot_period,
            unicast_attempt_count: UNICAST_ATTEMPT_COUNT,
        }
    }
}
