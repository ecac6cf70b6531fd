//! Pure builders for the desired per-tenant workload specs
//!
//! Everything in this module is deterministic and performs no cluster
//! access: (tenant id, env var list) in, `k8s_openapi` objects out. The
//! reconciler applies these specs; the rollout observer matches Pods by
//! the labels set here.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::WORKLOAD_NAME_PREFIX;

/// One environment variable for a tenant's agent container
///
/// The wire shape of the inbound API. Pairs are mapped onto the container
/// spec verbatim: no deduplication, no name-format validation. Malformed
/// names are the platform's to reject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEnv {
    /// Variable name, passed through as-is
    pub name: String,
    /// Variable value, passed through as-is
    pub value: String,
}

/// Deterministic workload name for a tenant: `agent-<tenant_id>`
pub fn workload_name(tenant_id: &str) -> String {
    format!("{WORKLOAD_NAME_PREFIX}{tenant_id}")
}

/// Label selector string matching every Pod of a tenant's workload
pub fn app_selector(name: &str) -> String {
    format!("app={name}")
}

/// Stable in-cluster URL of a tenant's Service
///
/// The Service is created once and never replaced, so this DNS name is
/// valid for the tenant's whole lifetime regardless of Pod churn.
pub fn service_url(config: &Config, tenant_id: &str) -> String {
    let name = workload_name(tenant_id);
    format!("http://{name}.{}.svc.cluster.local", config.namespace)
}

fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

/// Build the desired Deployment spec for a tenant
///
/// One replica, rolling update with `maxSurge=1, maxUnavailable=0`: the
/// new Pod must become Ready before the old one is removed, so a tenant
/// never observes downtime across a redeploy.
pub fn build_deployment(config: &Config, tenant_id: &str, env: &[AgentEnv]) -> Deployment {
    let name = workload_name(tenant_id);
    let labels = app_labels(&name);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(1)),
                    max_unavailable: Some(IntOrString::Int(0)),
                }),
            }),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "agent".to_string(),
                        image: Some(config.agent_image.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: config.agent_port as i32,
                            ..Default::default()
                        }]),
                        env: Some(env.iter().map(to_env_var).collect()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the desired ClusterIP Service spec for a tenant
///
/// Created only on first provisioning and never replaced, so the
/// ClusterIP and DNS name stay stable across redeploys.
pub fn build_service(config: &Config, tenant_id: &str) -> Service {
    let name = workload_name(tenant_id);

    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(app_labels(&name)),
            ports: Some(vec![ServicePort {
                port: config.service_port as i32,
                target_port: Some(IntOrString::Int(config.agent_port as i32)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_env_var(env: &AgentEnv) -> EnvVar {
    EnvVar {
        name: env.name.clone(),
        value: Some(env.value.clone()),
        ..Default::default()
    }
}
