//! Error types for Roost operations

use thiserror::Error;

/// Main error type for Roost operations
///
/// The reconciler performs no automatic retries: every fatal error is
/// surfaced to the caller verbatim. The only tolerated conditions
/// (Deployment not found on replace, Service already existing on create)
/// never become errors at all - they are encoded as `Option` outcomes on
/// the [`crate::cluster::ClusterClient`] capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Failure reading Deployment/ReplicaSet/Pod state from the cluster
    #[error("cluster read error: {0}")]
    ClusterRead(String),

    /// Failure creating or replacing a Deployment or Service
    #[error("cluster write error: {0}")]
    ClusterWrite(String),

    /// The rollout observation exhausted its budget without finding a
    /// qualifying Pod
    #[error("no ready pod for workload {workload} within {timeout_secs}s")]
    PodProvisioningTimeout {
        /// Name of the workload whose rollout was being observed
        workload: String,
        /// Detection budget that was exhausted, in seconds
        timeout_secs: u64,
    },

    /// Invalid caller input or configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure relaying a message to a tenant's agent Service
    #[error("agent relay error: {0}")]
    Relay(String),
}

impl Error {
    /// Create a cluster read error from any displayable source
    pub fn cluster_read(err: impl std::fmt::Display) -> Self {
        Self::ClusterRead(err.to_string())
    }

    /// Create a cluster write error from any displayable source
    pub fn cluster_write(err: impl std::fmt::Display) -> Self {
        Self::ClusterWrite(err.to_string())
    }

    /// Create a provisioning timeout error for the given workload
    pub fn provisioning_timeout(workload: impl Into<String>, timeout_secs: u64) -> Self {
        Self::PodProvisioningTimeout {
            workload: workload.into(),
            timeout_secs,
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a relay error from any displayable source
    pub fn relay(err: impl std::fmt::Display) -> Self {
        Self::Relay(err.to_string())
    }
}
