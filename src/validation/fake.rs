// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`TestResources`] for validation tests.
//!
//! Pods progress on the tokio clock, so tests run with paused time and the timeline is
//! exact: image pullers run `image_pull_running_after` after the test starts, and client
//! (or host checker) `i` becomes ready `ready_after[i]` after the clients are started.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::json;
use tokio::time::Instant;

use super::networks::ServerAddresses;
use super::resources::TestResources;
use super::ValidationError;
use crate::labels::{app_selector, IMAGE_PULL_APP_LABEL_VALUE};

pub(crate) const SERVER_PUBLIC_ADDR: &str = "192.168.20.21";

#[derive(Default)]
pub(crate) struct FakeState {
    pub calls: Vec<String>,
    pub owner_exists: bool,
    pub clients_started_at: Option<Instant>,
    pub image_pullers_deleted: bool,
}

pub(crate) struct FakeResources {
    pub start: Instant,
    /// Nodes per node type
    pub nodes: BTreeMap<String, u32>,
    /// Client daemonsets created per node type
    pub clients_per_node: u32,
    pub image_pull_running_after: Duration,
    pub ready_after: Vec<Duration>,
    pub overlapping_node_types: bool,
    pub state: Mutex<FakeState>,
}

impl FakeResources {
    /// Three nodes of one type, one client per node, pulls done in 10s, clients ready
    /// at `ready_after`.
    pub fn three_nodes(ready_after: &[u64]) -> Self {
        Self {
            start: Instant::now(),
            nodes: BTreeMap::from([("all".to_string(), 3)]),
            clients_per_node: 1,
            image_pull_running_after: Duration::from_secs(10),
            ready_after: ready_after.iter().copied().map(Duration::from_secs).collect(),
            overlapping_node_types: false,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn owner_exists(&self) -> bool {
        self.state.lock().unwrap().owner_exists
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }

    fn since_clients_started(&self) -> Option<Duration> {
        self.state
            .lock()
            .unwrap()
            .clients_started_at
            .map(|t| t.elapsed())
    }
}

#[async_trait]
impl TestResources for FakeResources {
    async fn create_owner(&self) -> Result<Vec<OwnerReference>, ValidationError> {
        self.record("create_owner");
        let mut state = self.state.lock().unwrap();
        if state.owner_exists {
            return Err(ValidationError::Fatal("owner already exists".to_string()));
        }
        state.owner_exists = true;
        Ok(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "multus-validation-test-owner".to_string(),
            uid: "uid-1".to_string(),
            block_owner_deletion: Some(true),
            controller: None,
        }])
    }

    async fn start_web_server(&self, _owners: &[OwnerReference]) -> Result<(), ValidationError> {
        self.record("start_web_server");
        Ok(())
    }

    async fn get_web_server_pod(&self) -> Result<Pod, ValidationError> {
        let status = json!([
            {"name": "k8s-pod-network", "ips": ["10.244.0.12"], "default": true},
            {"name": "rook-ceph/public-net", "interface": "net1", "ips": [SERVER_PUBLIC_ADDR]},
        ]);
        Ok(serde_json::from_value(json!({
            "metadata": {
                "name": "multus-validation-test-web-server",
                "annotations": {"k8s.v1.cni.cncf.io/network-status": status.to_string()},
            },
            "spec": {"nodeName": "node-a", "containers": []},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]},
        }))
        .unwrap())
    }

    async fn start_image_pullers(&self, _owners: &[OwnerReference]) -> Result<(), ValidationError> {
        self.record("start_image_pullers");
        Ok(())
    }

    async fn image_pull_pods_per_node_type(&self) -> Result<BTreeMap<String, u32>, ValidationError> {
        Ok(self.nodes.clone())
    }

    async fn ensure_one_image_pull_pod_per_node(&self) -> Result<(), ValidationError> {
        if self.overlapping_node_types {
            return Err(ValidationError::Fatal(
                "node types must not overlap".to_string(),
            ));
        }
        Ok(())
    }

    async fn num_running_pods(&self, selector: &str) -> Result<u32, ValidationError> {
        if selector == app_selector(IMAGE_PULL_APP_LABEL_VALUE) {
            let total = self.nodes.values().sum();
            return Ok(if self.start.elapsed() >= self.image_pull_running_after {
                total
            } else {
                0
            });
        }
        Ok(match self.since_clients_started() {
            Some(_) => u32::try_from(self.ready_after.len()).unwrap(),
            None => 0,
        })
    }

    async fn num_ready_pods(&self, _selector: &str) -> Result<u32, ValidationError> {
        let Some(elapsed) = self.since_clients_started() else {
            return Ok(0);
        };
        Ok(u32::try_from(self.ready_after.iter().filter(|d| **d <= elapsed).count()).unwrap())
    }

    async fn delete_daemon_sets(&self, selector: &str) -> Result<(), ValidationError> {
        self.record(format!("delete_daemon_sets {selector}"));
        self.state.lock().unwrap().image_pullers_deleted = true;
        Ok(())
    }

    async fn start_clients(
        &self,
        _owners: &[OwnerReference],
        server: &ServerAddresses,
        node_type: &str,
    ) -> Result<u32, ValidationError> {
        assert_eq!(server.public.as_deref(), Some(SERVER_PUBLIC_ADDR));
        self.record(format!("start_clients {node_type}"));
        self.state
            .lock()
            .unwrap()
            .clients_started_at
            .get_or_insert_with(Instant::now);
        Ok(self.clients_per_node)
    }

    async fn start_host_checkers(
        &self,
        _owners: &[OwnerReference],
        server_public_addr: &str,
    ) -> Result<(), ValidationError> {
        self.record(format!("start_host_checkers {server_public_addr}"));
        self.state.lock().unwrap().clients_started_at = Some(Instant::now());
        Ok(())
    }

    async fn clean_up(&self, _timeout: Duration) -> (Option<String>, Result<(), ValidationError>) {
        self.record("clean_up");
        self.state.lock().unwrap().owner_exists = false;
        (None, Ok(()))
    }
}
