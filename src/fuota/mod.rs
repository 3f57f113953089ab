//! # FUOTA Downlink Engine
//!
//! Everything on the multicast side of the transport: the static link
//! profiles, the orchestrator client facade, the per-chunk deployment
//! sender, the completion evaluator, and downlink timing statistics.

pub mod evaluator;
pub mod orchestrator;
pub mod profiles;
pub mod sender;
pub mod stats;

pub use evaluator::evaluate_deployment;
pub use orchestrator::{
    DeploymentDevice, DeploymentRequest, DeploymentStatus, DeviceDeploymentStatus,
    FuotaOrchestrator, HttpFuotaOrchestrator, LogEvent,
};
pub use profiles::{multicast_timeout_seconds, DownlinkSpeed, MulticastClass, Profile, Region};
pub use sender::MulticastSender;
pub use stats::{DownlinkReport, DownlinkStats};
