//! Runtime configuration for the provisioner

use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_AGENT_PORT, DEFAULT_NAMESPACE, DEFAULT_POD_TIMEOUT_SECS,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVICE_PORT,
};

/// Process-wide configuration for workload provisioning
///
/// Built once at startup from CLI/env arguments and shared (by clone or
/// reference) with every deploy call. The image and ports are fixed
/// process-wide; only the environment variable list varies per tenant.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace all agent workloads live in
    pub namespace: String,
    /// Container image every agent Pod runs
    pub agent_image: String,
    /// Port the agent process listens on inside the container
    pub agent_port: u16,
    /// Port the per-tenant ClusterIP Service exposes
    pub service_port: u16,
    /// Wall-clock budget for the new-Pod detection phase
    pub pod_timeout: Duration,
    /// Sleep between rollout polls
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            agent_image: String::new(),
            agent_port: DEFAULT_AGENT_PORT,
            service_port: DEFAULT_SERVICE_PORT,
            pod_timeout: Duration::from_secs(DEFAULT_POD_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl Config {
    /// Validate the configuration before serving
    ///
    /// The poll interval must be strictly less than the detection timeout,
    /// otherwise the rollout observer would never get a second look at the
    /// cluster before falling back.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::validation("namespace must not be empty"));
        }
        if self.agent_image.is_empty() {
            return Err(Error::validation("agent image must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::validation("poll interval must be non-zero"));
        }
        if self.poll_interval >= self.pod_timeout {
            return Err(Error::validation(format!(
                "poll interval ({:?}) must be strictly less than the pod timeout ({:?})",
                self.poll_interval, self.pod_timeout
            )));
        }
        Ok(())
    }
}
