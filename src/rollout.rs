//! New-Pod detection during a rolling update
//!
//! With `maxUnavailable=0` the old Pod keeps Running throughout a rolling
//! update, so "a Pod exists" is not a usable signal that the rollout has
//! progressed. The only reliable signal is a Ready Pod belonging to the
//! *new* spec version. This module observes the rollout by generation:
//! once the platform's controller reports an observed generation past the
//! pre-mutation snapshot, the current ReplicaSet is selected by its
//! `pod-template-hash` and its Pods are checked for readiness.
//!
//! Polling is bounded by the configured timeout. A transient API failure
//! during a poll is a no-signal iteration, not an abort; the budget is the
//! only thing that ends the wait. On timeout the observer degrades to
//! returning any existing Pod for the workload before giving up entirely.

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::workload::app_selector;
use crate::{Error, Result};

/// Label the platform stamps on every ReplicaSet and Pod of one spec version
const POD_TEMPLATE_HASH: &str = "pod-template-hash";

/// Wait until a Pod of the new rollout is Running and Ready
///
/// `baseline_generation` is the Deployment generation snapshotted before
/// the mutation (0 for a first deploy). Returns the Pod name, or
/// [`Error::PodProvisioningTimeout`] once the budget is exhausted and not
/// even a stale Pod exists for the workload.
///
/// The loop sleeps at iteration boundaries only, so cancelling the future
/// never abandons a half-done cluster call.
pub async fn wait_for_new_pod<C>(
    cluster: &C,
    config: &Config,
    name: &str,
    baseline_generation: i64,
) -> Result<String>
where
    C: ClusterClient + ?Sized,
{
    let deadline = Instant::now() + config.pod_timeout;

    while Instant::now() < deadline {
        tokio::time::sleep(config.poll_interval).await;

        match observe_rollout(cluster, name, baseline_generation).await {
            Ok(Some(pod_name)) => {
                debug!(workload = %name, pod = %pod_name, "new pod is ready");
                return Ok(pod_name);
            }
            Ok(None) => {}
            Err(err) => {
                // Transient read failures don't end the wait; the timeout does.
                warn!(workload = %name, error = %err, "rollout poll failed, retrying");
            }
        }
    }

    // Budget exhausted. Degrade to any Pod the workload still has - during
    // a stuck rollout that is the old Pod, which is at least serving.
    match cluster.list_pods(&app_selector(name)).await {
        Ok(pods) => {
            if let Some(pod_name) = pods.into_iter().find_map(|p| p.metadata.name) {
                warn!(
                    workload = %name,
                    pod = %pod_name,
                    "rollout not observed within budget, falling back to existing pod"
                );
                return Ok(pod_name);
            }
        }
        Err(err) => {
            warn!(workload = %name, error = %err, "fallback pod listing failed");
        }
    }

    Err(Error::provisioning_timeout(
        name,
        config.pod_timeout.as_secs(),
    ))
}

/// One observation of the rollout; `Ok(None)` means "no signal yet"
async fn observe_rollout<C>(
    cluster: &C,
    name: &str,
    baseline_generation: i64,
) -> Result<Option<String>>
where
    C: ClusterClient + ?Sized,
{
    let Some(deployment) = cluster.get_deployment(name).await? else {
        return Ok(None);
    };

    let observed = deployment
        .status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .unwrap_or(0);
    if observed <= baseline_generation {
        return Ok(None);
    }

    let replica_sets = cluster.list_replica_sets(&app_selector(name)).await?;
    let Some(hash) = select_current_template_hash(&replica_sets) else {
        return Ok(None);
    };

    let selector = format!("{},{POD_TEMPLATE_HASH}={hash}", app_selector(name));
    let pods = cluster.list_pods(&selector).await?;

    Ok(pods
        .iter()
        .find(|pod| pod_is_ready(pod))
        .and_then(|pod| pod.metadata.name.clone()))
}

/// Pick the `pod-template-hash` of the current ReplicaSet
///
/// Hash values are platform-internal. When every hash parses as base-16
/// the largest value wins (a heuristic, not a guarantee); as soon as any
/// hash fails to parse, the most recently created ReplicaSet wins instead.
fn select_current_template_hash(replica_sets: &[ReplicaSet]) -> Option<String> {
    let labeled: Vec<(&ReplicaSet, String)> = replica_sets
        .iter()
        .filter_map(|rs| {
            let hash = rs.metadata.labels.as_ref()?.get(POD_TEMPLATE_HASH)?;
            Some((rs, hash.clone()))
        })
        .collect();
    if labeled.is_empty() {
        return None;
    }

    let parsed: Option<Vec<u64>> = labeled
        .iter()
        .map(|(_, hash)| u64::from_str_radix(hash, 16).ok())
        .collect();
    if let Some(values) = parsed {
        let (idx, _) = values.iter().enumerate().max_by_key(|(_, v)| **v)?;
        return Some(labeled[idx].1.clone());
    }

    labeled
        .into_iter()
        .max_by_key(|(rs, _)| rs.metadata.creation_timestamp.clone().map(|t| t.0))
        .map(|(_, hash)| hash)
}

/// Whether a Pod is Running with a Ready condition of True
pub(crate) fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .as_ref()
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    use crate::cluster::MockClusterClient;

    fn fast_config() -> Config {
        Config {
            agent_image: "agent:test".to_string(),
            pod_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            ..Config::default()
        }
    }

    fn deployment_observing(generation: i64) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                observed_generation: Some(generation),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn replica_set(name: &str, hash: &str, created_secs: i64) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(std::collections::BTreeMap::from([
                    ("app".to_string(), "agent-u1".to_string()),
                    (POD_TEMPLATE_HASH.to_string(), hash.to_string()),
                ])),
                creation_timestamp: Some(Time(
                    Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap(),
                )),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: &str, ready: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // ===== ReplicaSet selection =====

    #[test]
    fn largest_hex_hash_wins_when_all_parse() {
        let sets = vec![
            replica_set("rs-old", "1a2b", 0),
            replica_set("rs-new", "ff00", 10),
            replica_set("rs-mid", "2c3d", 20),
        ];
        // "ff00" is numerically largest even though "rs-mid" is newest
        assert_eq!(select_current_template_hash(&sets).as_deref(), Some("ff00"));
    }

    #[test]
    fn newest_replica_set_wins_when_hashes_are_not_hex() {
        // Modern platforms use a non-hex safe alphabet for the hash, so the
        // integer heuristic cannot apply and recency decides.
        let sets = vec![
            replica_set("rs-old", "zzz999", 0),
            replica_set("rs-new", "xyz123", 30),
        ];
        assert_eq!(
            select_current_template_hash(&sets).as_deref(),
            Some("xyz123")
        );
    }

    #[test]
    fn replica_sets_without_hash_label_are_ignored() {
        let mut unlabeled = replica_set("rs-bare", "unused", 0);
        unlabeled.metadata.labels = Some(std::collections::BTreeMap::from([(
            "app".to_string(),
            "agent-u1".to_string(),
        )]));

        assert_eq!(select_current_template_hash(&[unlabeled]), None);
        assert_eq!(select_current_template_hash(&[]), None);
    }

    // ===== Pod readiness =====

    #[test]
    fn running_and_ready_pod_qualifies() {
        assert!(pod_is_ready(&pod("p", "Running", true)));
    }

    #[test]
    fn running_but_unready_pod_does_not_qualify() {
        assert!(!pod_is_ready(&pod("p", "Running", false)));
    }

    #[test]
    fn pending_or_statusless_pods_do_not_qualify() {
        assert!(!pod_is_ready(&pod("p", "Pending", true)));
        assert!(!pod_is_ready(&Pod::default()));
    }

    // ===== Rollout observation =====

    /// Story: during a rolling update the old Pod stays Running the whole
    /// time. The observer must return the Pod of the new ReplicaSet, never
    /// the old one - the hash-scoped selector makes the old Pod invisible.
    #[tokio::test]
    async fn new_pod_is_returned_while_old_pod_still_runs() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment()
            .returning(|_| Ok(Some(deployment_observing(2))));
        mock.expect_list_replica_sets().returning(|_| {
            Ok(vec![
                replica_set("rs-old", "1a2b", 0),
                replica_set("rs-new", "ff00", 10),
            ])
        });
        mock.expect_list_pods()
            .withf(|selector: &str| selector.contains("pod-template-hash=ff00"))
            .returning(|_| Ok(vec![pod("agent-u1-ff00-x7k2p", "Running", true)]));

        let name = wait_for_new_pod(&mock, &fast_config(), "agent-u1", 1)
            .await
            .expect("detection should succeed");
        assert_eq!(name, "agent-u1-ff00-x7k2p");
    }

    /// Story: the controller has seen the new generation but the new Pod is
    /// still unready; once it flips Ready the observer returns it.
    #[tokio::test]
    async fn waits_until_new_pod_becomes_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();

        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment()
            .returning(|_| Ok(Some(deployment_observing(3))));
        mock.expect_list_replica_sets()
            .returning(|_| Ok(vec![replica_set("rs-new", "ab12", 0)]));
        mock.expect_list_pods().returning(move |_| {
            let ready = calls_in_mock.fetch_add(1, Ordering::SeqCst) >= 2;
            Ok(vec![pod("agent-u1-ab12-q9f4z", "Running", ready)])
        });

        let name = wait_for_new_pod(&mock, &fast_config(), "agent-u1", 2)
            .await
            .expect("detection should succeed");
        assert_eq!(name, "agent-u1-ab12-q9f4z");
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    /// Story: the rollout never progresses. The wait degrades to the
    /// existing (stale) Pod rather than failing outright, because a stale
    /// Running Pod is still serving traffic.
    #[tokio::test]
    async fn timeout_falls_back_to_any_existing_pod() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment()
            .returning(|_| Ok(Some(deployment_observing(1))));
        mock.expect_list_pods()
            .withf(|selector: &str| !selector.contains(POD_TEMPLATE_HASH))
            .returning(|_| Ok(vec![pod("agent-u1-old-pod", "Running", true)]));

        let name = wait_for_new_pod(&mock, &fast_config(), "agent-u1", 1)
            .await
            .expect("degraded fallback should succeed");
        assert_eq!(name, "agent-u1-old-pod");
    }

    /// Story: no rollout progress and no Pods at all - the caller gets the
    /// timeout error, and gets it within timeout + one poll interval.
    #[tokio::test]
    async fn timeout_with_no_pods_errors_within_budget() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment()
            .returning(|_| Ok(Some(deployment_observing(1))));
        mock.expect_list_pods().returning(|_| Ok(vec![]));

        let config = fast_config();
        let started = std::time::Instant::now();
        let result = wait_for_new_pod(&mock, &config, "agent-u1", 1).await;
        let elapsed = started.elapsed();

        assert!(matches!(
            result,
            Err(Error::PodProvisioningTimeout { ref workload, .. }) if workload == "agent-u1"
        ));
        assert!(elapsed >= config.pod_timeout);
        // Bounded by timeout + one poll interval, with scheduling slack
        assert!(elapsed < config.pod_timeout + config.poll_interval + Duration::from_millis(150));
    }

    /// Story: a flaky API server fails a few polls; the observer treats
    /// them as empty iterations and still finds the Pod within budget.
    #[tokio::test]
    async fn transient_read_errors_do_not_abort_the_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();

        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment().returning(move |_| {
            if calls_in_mock.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(Error::cluster_read("etcdserver: leader changed"))
            } else {
                Ok(Some(deployment_observing(2)))
            }
        });
        mock.expect_list_replica_sets()
            .returning(|_| Ok(vec![replica_set("rs-new", "cd34", 0)]));
        mock.expect_list_pods()
            .returning(|_| Ok(vec![pod("agent-u1-cd34-m2n8r", "Running", true)]));

        let name = wait_for_new_pod(&mock, &fast_config(), "agent-u1", 1)
            .await
            .expect("detection should survive transient errors");
        assert_eq!(name, "agent-u1-cd34-m2n8r");
    }

    /// Story: a deploy raced a teardown and the Deployment vanished
    /// mid-wait; that is a no-signal iteration, not a crash.
    #[tokio::test]
    async fn missing_deployment_is_a_no_signal_iteration() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment().returning(|_| Ok(None));
        mock.expect_list_pods().returning(|_| Ok(vec![]));

        let result = wait_for_new_pod(&mock, &fast_config(), "agent-u1", 0).await;
        assert!(matches!(result, Err(Error::PodProvisioningTimeout { .. })));
    }
}
