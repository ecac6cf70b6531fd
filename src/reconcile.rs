//! Create-or-update reconciliation of per-tenant workloads
//!
//! A deploy call is one pass of a small state machine: snapshot the
//! current Deployment, apply the desired spec, create the Service exactly
//! once per tenant, then resolve the Pod serving the new spec version.
//! Nothing is persisted in-process; the snapshot lives only for the call.
//!
//! Concurrent deploys for the same tenant are not mutually excluded here.
//! The platform's per-object semantics are the safety net: the last
//! replace to land wins, and the two races that concurrency can produce
//! (Deployment deleted between snapshot and replace, Service created by
//! the other call first) are tolerated explicitly.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::rollout;
use crate::workload::{build_deployment, build_service, service_url, workload_name, AgentEnv};
use crate::{Error, Result};

/// Outcome of a successful deploy
#[derive(Clone, Debug)]
pub struct Provisioned {
    /// Name of the Pod that is Running and Ready for the new spec
    pub pod_name: String,
    /// Stable in-cluster URL of the tenant's Service
    pub service_url: String,
    /// Whether this call created the workload for the first time
    pub first_create: bool,
}

/// Per-tenant workload reconciler
///
/// Cheap to clone; safe to drive from many concurrent requests, since the
/// only shared mutable state is the cluster's object store itself.
pub struct Reconciler<C> {
    cluster: Arc<C>,
    config: Config,
}

impl<C> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            cluster: self.cluster.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: ClusterClient> Reconciler<C> {
    /// Create a reconciler over the given cluster client
    pub fn new(cluster: Arc<C>, config: Config) -> Self {
        Self { cluster, config }
    }

    /// The configuration this reconciler provisions with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ensure the tenant's workload matches the desired env, and resolve
    /// the Pod that is ready to serve it
    ///
    /// Synchronous from the caller's point of view; internally bounded by
    /// the configured detection timeout (the apply phase itself has no
    /// timeout beyond the platform's own API latency).
    #[instrument(skip(self, env), fields(tenant = %tenant_id))]
    pub async fn deploy(&self, tenant_id: &str, env: &[AgentEnv]) -> Result<Provisioned> {
        if tenant_id.is_empty() {
            return Err(Error::validation("tenant id must not be empty"));
        }
        let name = workload_name(tenant_id);

        // Snapshot before mutating. The baseline generation is what the
        // rollout observer compares observed_generation against.
        let current = self.cluster.get_deployment(&name).await?;
        let snapshot_generation = current
            .as_ref()
            .and_then(|d| d.metadata.generation)
            .unwrap_or(0);

        let desired = build_deployment(&self.config, tenant_id, env);
        let first_create = match self.cluster.replace_deployment(&name, &desired).await? {
            Some(_) => false,
            // Not found: a genuine first deploy, or a deletion racing the
            // replace. Either way the workload starts from nothing.
            None => {
                self.cluster.create_deployment(&desired).await?;
                true
            }
        };

        // A freshly created Deployment starts its generation over; the
        // snapshot taken above no longer describes this object.
        let baseline_generation = if first_create { 0 } else { snapshot_generation };

        if first_create {
            let service = build_service(&self.config, tenant_id);
            match self.cluster.create_service(&service).await? {
                Some(_) => info!(workload = %name, "service created"),
                None => debug!(workload = %name, "service already exists, continuing"),
            }
        }

        let pod_name =
            rollout::wait_for_new_pod(&*self.cluster, &self.config, &name, baseline_generation)
                .await?;

        info!(workload = %name, pod = %pod_name, first_create, "workload reconciled");

        Ok(Provisioned {
            pod_name,
            service_url: service_url(&self.config, tenant_id),
            first_create,
        })
    }

    /// Remove the tenant's workload
    ///
    /// Deletes the Deployment and the Service; Pods are garbage-collected
    /// by the platform through the ReplicaSet ownership chain. Idempotent:
    /// absent resources are success.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn teardown(&self, tenant_id: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(Error::validation("tenant id must not be empty"));
        }
        let name = workload_name(tenant_id);

        self.cluster.delete_deployment(&name).await?;
        self.cluster.delete_service(&name).await?;

        info!(workload = %name, "workload torn down");
        Ok(())
    }
}
