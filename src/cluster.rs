//! Cluster object client capability
//!
//! The reconciler and rollout observer are written against the
//! [`ClusterClient`] trait so that the Kubernetes client can be mocked in
//! tests while the real client is used in production.
//!
//! The two tolerated races of the deploy flow are encoded here as `Option`
//! outcomes rather than errors: a replace against a Deployment the platform
//! no longer knows about returns `None` (the reconciler falls back to
//! create), and a Service create that loses against a concurrent first
//! deploy returns `None` (treated as success). Every other platform failure
//! maps into the error taxonomy - read paths to `ClusterRead`, write paths
//! to `ClusterWrite`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Typed capability over the cluster's object store
///
/// Namespace is fixed per client instance; all names and label selectors
/// are relative to it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a Deployment by name
    ///
    /// Returns `None` when the Deployment does not exist.
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Replace an existing Deployment with a new spec
    ///
    /// Returns `None` when the platform reports the Deployment as not
    /// found - either a genuine first deploy or a deletion racing the
    /// replace. The caller decides the fallback.
    async fn replace_deployment(
        &self,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Option<Deployment>>;

    /// Create a Service
    ///
    /// Returns `None` when the Service already exists (a concurrent first
    /// deploy for the same tenant won the race), which callers treat as
    /// success.
    async fn create_service(&self, service: &Service) -> Result<Option<Service>>;

    /// List ReplicaSets matching a label selector
    async fn list_replica_sets(&self, label_selector: &str) -> Result<Vec<ReplicaSet>>;

    /// List Pods matching a label selector
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>>;

    /// Delete a Deployment by name; absent Deployments are not an error
    async fn delete_deployment(&self, name: &str) -> Result<()>;

    /// Delete a Service by name; absent Services are not an error
    async fn delete_service(&self, name: &str) -> Result<()>;
}

/// HTTP status code carried by a platform API error, if any
fn api_status_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Real cluster client backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    /// Create a client scoped to the given namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn replica_sets(&self) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        self.deployments()
            .get_opt(name)
            .await
            .map_err(Error::cluster_read)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        self.deployments()
            .create(&PostParams::default(), deployment)
            .await
            .map_err(Error::cluster_write)
    }

    async fn replace_deployment(
        &self,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Option<Deployment>> {
        match self
            .deployments()
            .replace(name, &PostParams::default(), deployment)
            .await
        {
            Ok(replaced) => Ok(Some(replaced)),
            Err(err) if api_status_code(&err) == Some(404) => Ok(None),
            Err(err) => Err(Error::cluster_write(err)),
        }
    }

    async fn create_service(&self, service: &Service) -> Result<Option<Service>> {
        match self.services().create(&PostParams::default(), service).await {
            Ok(created) => Ok(Some(created)),
            Err(err) if api_status_code(&err) == Some(409) => Ok(None),
            Err(err) => Err(Error::cluster_write(err)),
        }
    }

    async fn list_replica_sets(&self, label_selector: &str) -> Result<Vec<ReplicaSet>> {
        let list = self
            .replica_sets()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::cluster_read)?;
        Ok(list.items)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::cluster_read)?;
        Ok(list.items)
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        match self.deployments().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if api_status_code(&err) == Some(404) => Ok(()),
            Err(err) => Err(Error::cluster_write(err)),
        }
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        match self.services().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if api_status_code(&err) == Some(404) => Ok(()),
            Err(err) => Err(Error::cluster_write(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn api_errors_expose_their_status_code() {
        assert_eq!(api_status_code(&api_error(404, "NotFound")), Some(404));
        assert_eq!(api_status_code(&api_error(409, "AlreadyExists")), Some(409));
        assert_eq!(api_status_code(&api_error(403, "Forbidden")), Some(403));
    }

    #[test]
    fn non_api_errors_have_no_status_code() {
        // A request-level failure never carries a platform status code, so
        // it can never be mistaken for a tolerated race.
        let decode_failure = serde_json::from_str::<i32>("not json").unwrap_err();
        let err = kube::Error::SerdeError(decode_failure);
        assert_eq!(api_status_code(&err), None);
    }
}
