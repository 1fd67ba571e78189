// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation test resource management.
//!
//! [`TestResources`] is everything the state machine needs from the cluster. The
//! [`KubeTestResources`] implementation renders objects with [`super::templates`] and
//! talks to the Kubernetes API in the test namespace.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use super::config::ValidationTestConfig;
use super::networks::{ServerAddresses, TestNetworks};
use super::templates::{
    build_client_daemon_set, build_host_checker_daemon_set, build_image_pull_daemon_set,
    build_owner_config_map, build_owner_references, build_web_server_config_map,
    build_web_server_pod, ClientType,
};
use super::ValidationError;
use crate::constants::{CLEANUP_POLL_INTERVAL, OWNER_CONFIG_MAP_NAME, WEB_SERVER_POD_NAME};
use crate::labels::{
    app_selector, CLIENT_APP_LABEL_VALUE, CLIENT_TYPE_NON_OSD, CLIENT_TYPE_OSD,
    IMAGE_PULL_APP_LABEL_VALUE, NODE_TYPE_LABEL,
};

/// Instructions for removing a test by hand.
#[must_use]
pub fn manual_cleanup_instructions() -> String {
    format!(
        "manually delete owner configmap {OWNER_CONFIG_MAP_NAME:?}, and wait for all \
         multus-validation-test resources to be deleted"
    )
}

/// Suggestion given when the test cannot even start.
#[must_use]
pub fn previous_test_suggestion() -> String {
    format!(
        "there could be a past test preventing this one from proceeding; {}",
        manual_cleanup_instructions()
    )
}

/// Whether `pod` is in the `Running` phase.
#[must_use]
pub fn pod_is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Whether `pod` reports the `Ready` condition as `True`.
#[must_use]
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Cluster operations used by the validation test.
#[async_trait]
pub trait TestResources: Send + Sync {
    /// Create the owner config map and return references to it.
    async fn create_owner(&self) -> Result<Vec<OwnerReference>, ValidationError>;

    /// Create the web server config and pod.
    async fn start_web_server(&self, owners: &[OwnerReference]) -> Result<(), ValidationError>;

    async fn get_web_server_pod(&self) -> Result<Pod, ValidationError>;

    /// Create one image-pull daemonset per node type.
    async fn start_image_pullers(&self, owners: &[OwnerReference]) -> Result<(), ValidationError>;

    /// Scheduled image-pull pods per node type.
    ///
    /// Fails until every node type has a daemonset with at least one scheduled pod.
    async fn image_pull_pods_per_node_type(&self) -> Result<BTreeMap<String, u32>, ValidationError>;

    /// Fails with [`ValidationError::Fatal`] if any node runs two image-pull pods, which
    /// means two node types select the same node.
    async fn ensure_one_image_pull_pod_per_node(&self) -> Result<(), ValidationError>;

    async fn num_running_pods(&self, selector: &str) -> Result<u32, ValidationError>;

    async fn num_ready_pods(&self, selector: &str) -> Result<u32, ValidationError>;

    /// Delete all daemonsets matching `selector`; nothing to delete is success.
    async fn delete_daemon_sets(&self, selector: &str) -> Result<(), ValidationError>;

    /// Create the client daemonsets of `node_type`, returning how many were created.
    async fn start_clients(
        &self,
        owners: &[OwnerReference],
        server: &ServerAddresses,
        node_type: &str,
    ) -> Result<u32, ValidationError>;

    /// Create one host-checker daemonset per node type.
    async fn start_host_checkers(
        &self,
        owners: &[OwnerReference],
        server_public_addr: &str,
    ) -> Result<(), ValidationError>;

    /// Delete the whole test and wait up to `timeout` for it to be gone.
    ///
    /// Returns a suggestion for manual action alongside any error.
    async fn clean_up(&self, timeout: Duration) -> (Option<String>, Result<(), ValidationError>);
}

/// [`TestResources`] backed by the Kubernetes API.
pub struct KubeTestResources {
    client: Client,
    config: ValidationTestConfig,
    networks: TestNetworks,
}

impl KubeTestResources {
    #[must_use]
    pub fn new(client: Client, config: ValidationTestConfig, networks: TestNetworks) -> Self {
        Self {
            client,
            config,
            networks,
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn daemon_sets(&self) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    async fn create_daemon_set(&self, ds: &DaemonSet, what: &str) -> Result<(), ValidationError> {
        self.daemon_sets()
            .create(&PostParams::default(), ds)
            .await
            .map_err(|e| ValidationError::Fatal(format!("failed to create {what} daemonset: {e}")))?;
        debug!(
            daemonset = ?ds.metadata.name,
            namespace = %self.config.namespace,
            "Created daemonset"
        );
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ValidationError> {
        Ok(self
            .pods()
            .list(&ListParams::default().labels(selector))
            .await?
            .items)
    }

    async fn wait_for_owner_deletion(&self, timeout: Duration) -> Result<(), String> {
        let mut last_error = None;
        let poll = async {
            loop {
                match self.config_maps().get(OWNER_CONFIG_MAP_NAME).await {
                    Err(e) if is_not_found(&e) => return,
                    Err(e) => {
                        warn!(error = %e, "Failed to check for owner config map");
                        last_error = Some(format!(
                            "unexpected error when cleaning up multus validation test resources; \
                             attempting to continue: {e}"
                        ));
                    }
                    Ok(_) => debug!("Waiting for multus validation test resources to be deleted"),
                }
                tokio::time::sleep(CLEANUP_POLL_INTERVAL).await;
            }
        };
        if tokio::time::timeout(timeout, poll).await.is_ok() {
            return Ok(());
        }
        Err(last_error.unwrap_or_else(|| {
            "timed out waiting for multus validation test resources to be deleted".to_string()
        }))
    }
}

#[async_trait]
impl TestResources for KubeTestResources {
    async fn create_owner(&self) -> Result<Vec<OwnerReference>, ValidationError> {
        let owner = build_owner_config_map(&self.config.namespace);
        let created = self
            .config_maps()
            .create(&PostParams::default(), &owner)
            .await
            .map_err(|e| {
                ValidationError::Fatal(format!(
                    "failed to create validation test owner config map {OWNER_CONFIG_MAP_NAME:?}: {e}"
                ))
            })?;
        build_owner_references(&created)
    }

    async fn start_web_server(&self, owners: &[OwnerReference]) -> Result<(), ValidationError> {
        let placement = self.config.best_node_placement_for_server()?;
        let config_map = build_web_server_config_map(&self.config.namespace, owners);
        let pod = build_web_server_pod(&self.config, &self.networks, &placement, owners);

        // Config first so the server does not crash-loop on its first start.
        self.config_maps()
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| ValidationError::Fatal(format!("failed to create web server config: {e}")))?;
        self.pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| ValidationError::Fatal(format!("failed to create web server pod: {e}")))?;
        info!(namespace = %self.config.namespace, "Started web server");
        Ok(())
    }

    async fn get_web_server_pod(&self) -> Result<Pod, ValidationError> {
        self.pods().get(WEB_SERVER_POD_NAME).await.map_err(|e| {
            ValidationError::NotReady(format!("unexpected error when getting web server pod: {e}"))
        })
    }

    async fn start_image_pullers(&self, owners: &[OwnerReference]) -> Result<(), ValidationError> {
        for (node_type, node) in &self.config.node_types {
            let ds = build_image_pull_daemon_set(&self.config, node_type, &node.placement, owners);
            self.create_daemon_set(&ds, "image pull").await?;
        }
        Ok(())
    }

    async fn image_pull_pods_per_node_type(&self) -> Result<BTreeMap<String, u32>, ValidationError> {
        let dsets = self
            .daemon_sets()
            .list(&ListParams::default().labels(&app_selector(IMAGE_PULL_APP_LABEL_VALUE)))
            .await?
            .items;
        let expected = self.config.node_types.len();
        if dsets.len() != expected {
            return Err(ValidationError::NotReady(format!(
                "got {} image pull daemonsets when {expected} should exist",
                dsets.len()
            )));
        }

        let mut scheduled = BTreeMap::new();
        for ds in &dsets {
            let node_type = ds
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(NODE_TYPE_LABEL))
                .cloned()
                .unwrap_or_default();
            let count = ds
                .status
                .as_ref()
                .map_or(0, |s| s.current_number_scheduled);
            if count <= 0 {
                return Err(ValidationError::NotReady(format!(
                    "image pull daemonset for node type {node_type:?} has no scheduled pods"
                )));
            }
            scheduled.insert(node_type, u32::try_from(count).unwrap_or(0));
        }
        Ok(scheduled)
    }

    async fn ensure_one_image_pull_pod_per_node(&self) -> Result<(), ValidationError> {
        let pods = self
            .list_pods(&app_selector(IMAGE_PULL_APP_LABEL_VALUE))
            .await?;
        let mut nodes: HashMap<String, String> = HashMap::new();
        for pod in &pods {
            let node = pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default();
            if node.is_empty() {
                continue;
            }
            let node_type = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(NODE_TYPE_LABEL))
                .cloned()
                .unwrap_or_default();
            if let Some(other) = nodes.insert(node.clone(), node_type.clone()) {
                return Err(ValidationError::Fatal(format!(
                    "node types must not overlap: node type {node_type:?} has overlap with \
                     node type {other:?} on node {node:?}"
                )));
            }
        }
        Ok(())
    }

    async fn num_running_pods(&self, selector: &str) -> Result<u32, ValidationError> {
        let pods = self.list_pods(selector).await?;
        Ok(u32::try_from(pods.iter().filter(|p| pod_is_running(p)).count()).unwrap_or(u32::MAX))
    }

    async fn num_ready_pods(&self, selector: &str) -> Result<u32, ValidationError> {
        let pods = self.list_pods(selector).await?;
        Ok(u32::try_from(pods.iter().filter(|p| pod_is_ready(p)).count()).unwrap_or(u32::MAX))
    }

    async fn delete_daemon_sets(&self, selector: &str) -> Result<(), ValidationError> {
        match self
            .daemon_sets()
            .delete_collection(
                &DeleteParams::default().grace_period(0),
                &ListParams::default().labels(selector),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_clients(
        &self,
        owners: &[OwnerReference],
        server: &ServerAddresses,
        node_type: &str,
    ) -> Result<u32, ValidationError> {
        let Some(node) = self.config.node_types.get(node_type) else {
            return Err(ValidationError::Fatal(format!("unknown node type {node_type:?}")));
        };

        let mut clients: Vec<(ClientType, u32)> = Vec::new();
        info!(
            count = node.osds_per_node,
            client_type = CLIENT_TYPE_OSD,
            node_type,
            "Starting validation clients"
        );
        clients.extend((0..node.osds_per_node).map(|id| (ClientType::Osd, id)));
        // Public-only clients need a public network.
        if server.public.is_some() {
            info!(
                count = node.other_daemons_per_node,
                client_type = CLIENT_TYPE_NON_OSD,
                node_type,
                "Starting validation clients"
            );
            clients.extend((0..node.other_daemons_per_node).map(|id| (ClientType::NonOsd, id)));
        }

        let mut created = 0;
        for (client_type, id) in clients {
            let ds = build_client_daemon_set(
                &self.config,
                &self.networks,
                server,
                node_type,
                client_type,
                id,
                &node.placement,
                owners,
            );
            self.create_daemon_set(
                &ds,
                &format!(
                    "client (node type {node_type:?}, client type {:?}, client #{id})",
                    client_type.label()
                ),
            )
            .await?;
            created += 1;
        }
        Ok(created)
    }

    async fn start_host_checkers(
        &self,
        owners: &[OwnerReference],
        server_public_addr: &str,
    ) -> Result<(), ValidationError> {
        for (node_type, node) in &self.config.node_types {
            let ds = build_host_checker_daemon_set(
                &self.config,
                server_public_addr,
                node_type,
                &node.placement,
                owners,
            );
            self.create_daemon_set(&ds, "host checker").await?;
        }
        Ok(())
    }

    async fn clean_up(&self, timeout: Duration) -> (Option<String>, Result<(), ValidationError>) {
        let delete = DeleteParams::foreground().grace_period(0);
        match self.config_maps().delete(OWNER_CONFIG_MAP_NAME, &delete).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {
                info!(namespace = %self.config.namespace, "No multus validation test resources to clean up");
                return (None, Ok(()));
            }
            Err(e) => {
                return (
                    Some(manual_cleanup_instructions()),
                    Err(ValidationError::Fatal(format!(
                        "failed to clean up multus validation test resources: {e}"
                    ))),
                );
            }
        }

        // Foreground deletion does not pass the zero grace period on to dependents.
        if let Err(e) = self
            .pods()
            .delete_collection(&delete, &ListParams::default().labels(&app_selector(CLIENT_APP_LABEL_VALUE)))
            .await
        {
            debug!(error = %e, "Best-effort client pod deletion failed");
        }

        match self.wait_for_owner_deletion(timeout).await {
            Ok(()) => {
                info!(namespace = %self.config.namespace, "Cleaned up multus validation test resources");
                (None, Ok(()))
            }
            Err(reason) => (
                Some(format!("{reason}; {}", manual_cleanup_instructions())),
                Err(ValidationError::Fatal(format!(
                    "failed waiting for multus validation test resources to be deleted: {reason}"
                ))),
            ),
        }
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
