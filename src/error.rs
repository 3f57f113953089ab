//! # Transport Error Handling
//!
//! This module defines the FuotaError enum, which represents the different
//! error types that can occur in the dmp-fuota crate.

use thiserror::Error;

/// Represents the different error types that can occur in the transport.
#[derive(Debug, Error)]
pub enum FuotaError {
    /// Indicates that the device registry rejected the connection: the
    /// server was unreachable, the application id was unknown, or no
    /// configured device could be resolved.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Indicates a transport or authorization failure talking to the FUOTA
    /// orchestrator. Non-fatal while polling a deployment; fatal when it
    /// prevents a deployment from being created.
    #[error("FUOTA orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// Indicates the completion evaluator has evidence that no device will
    /// finish the current deployment.
    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    /// Indicates the per-send deadline elapsed before the deployment
    /// completed.
    #[error("Deployment timeout: {elapsed_s} s elapsed, limit {max_s} s")]
    DeploymentTimeout { elapsed_s: u64, max_s: u64 },

    /// Indicates a device EUI could not be resolved in the message store.
    #[error("Device not found in message store: {0}")]
    DeviceNotFound(String),

    /// Indicates a transport failure talking to the uplink message store.
    #[error("Message store unavailable: {0}")]
    MessageStoreUnavailable(String),

    /// Indicates an uplink that cannot be a DMP response: an op above 3, a
    /// frame shorter than the header, or an overlong reassembly buffer.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Indicates the receive window closed without a complete response.
    #[error("Receive timeout: {0}")]
    ReceiveTimeout(String),

    /// Indicates a transport failure talking to the device registry.
    #[error("Device registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Indicates an invalid transport configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
