//! # Downlink Timing Statistics
//!
//! Accumulates per-deployment multicast and setup durations from the
//! orchestrator's status timestamps and reports link utilization over the
//! transport's wall-clock lifetime.

use crate::fuota::orchestrator::DeploymentStatus;
use std::fmt;
use tokio::time::Instant;

/// Accumulated downlink timing across deployments.
#[derive(Debug)]
pub struct DownlinkStats {
    started: Instant,
    deployments: u32,
    multicast_s: u64,
    setup_s: u64,
}

/// One-shot utilization report derived from [`DownlinkStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkReport {
    pub deployments: u32,
    /// Fraction of wall time spent in multicast downlink
    pub multicast_utilization: f64,
    /// Fraction of wall time spent in multicast group and session setup
    pub setup_overhead: f64,
    pub wall_time_s: f64,
}

impl DownlinkStats {
    /// Starts the wall clock.
    pub fn new() -> Self {
        DownlinkStats {
            started: Instant::now(),
            deployments: 0,
            multicast_s: 0,
            setup_s: 0,
        }
    }

    /// Accumulates one completed deployment. Unset (zero) or out-of-order
    /// timestamps contribute nothing.
    pub fn record_deployment(&mut self, status: &DeploymentStatus) {
        self.deployments += 1;
        if status.enqueue_completed_at > 0
            && status.frag_status_completed_at >= status.enqueue_completed_at
        {
            self.multicast_s +=
                (status.frag_status_completed_at - status.enqueue_completed_at) as u64;
        }
        if status.mc_group_setup_completed_at > 0
            && status.enqueue_completed_at >= status.mc_group_setup_completed_at
        {
            self.setup_s +=
                (status.enqueue_completed_at - status.mc_group_setup_completed_at) as u64;
        }
    }

    /// Utilization report over the wall time since construction.
    pub fn report(&self) -> DownlinkReport {
        let wall_time_s = self.started.elapsed().as_secs_f64();
        let ratio = |part: u64| {
            if wall_time_s > 0.0 {
                part as f64 / wall_time_s
            } else {
                0.0
            }
        };
        DownlinkReport {
            deployments: self.deployments,
            multicast_utilization: ratio(self.multicast_s),
            setup_overhead: ratio(self.setup_s),
            wall_time_s,
        }
    }
}

impl Default for DownlinkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownlinkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deployment(s) in {:.0} s: {:.1}% multicast downlink, {:.1}% setup",
            self.deployments,
            self.wall_time_s,
            self.multicast_utilization * 100.0,
            self.setup_overhead * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuota::orchestrator::DeploymentStatus;

    fn status(setup: i64, enqueue: i64, frag: i64) -> DeploymentStatus {
        DeploymentStatus {
            mc_group_setup_completed_at: setup,
            enqueue_completed_at: enqueue,
            frag_status_completed_at: frag,
            device_status: Vec::new(),
        }
    }

    #[test]
    fn accumulates_multicast_and_setup_time() {
        let mut stats = DownlinkStats::new();
        stats.record_deployment(&status(100, 130, 430));
        stats.record_deployment(&status(500, 520, 820));
        assert_eq!(stats.deployments, 2);
        assert_eq!(stats.multicast_s, 600);
        assert_eq!(stats.setup_s, 50);
    }

    #[test]
    fn ignores_unset_timestamps() {
        let mut stats = DownlinkStats::new();
        stats.record_deployment(&status(0, 0, 0));
        assert_eq!(stats.multicast_s, 0);
        assert_eq!(stats.setup_s, 0);
        assert_eq!(stats.deployments, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn report_guards_zero_wall_time() {
        let stats = DownlinkStats::new();
        let report = stats.report();
        assert_eq!(report.multicast_utilization, 0.0);
        assert_eq!(report.setup_overhead, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_ratios_over_wall_time() {
        let mut stats = DownlinkStats::new();
        stats.record_deployment(&status(100, 150, 650));
        tokio::time::sleep(std::time::Duration::from_secs(1000)).await;
        let report = stats.report();
        assert!((report.multicast_utilization - 0.5).abs() < 1e-6);
        assert!((report.setup_overhead - 0.05).abs() < 1e-6);
    }
}
