// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation test configuration.
//!
//! A config describes which Multus networks to test and how many clients each kind of node
//! should run. It can be built from CLI flags, loaded from YAML, or started from one of
//! three templates that match common cluster layouts:
//!
//! - **converged** - every node runs storage and other workloads
//! - **dedicated-storage-nodes** - labeled, tainted storage nodes plus plain workers
//! - **stretch-cluster** - the dedicated layout plus an arbiter node
//!
//! [`ValidationTestConfig::to_yaml`] writes each field with a usage comment above it;
//! [`ValidationTestConfig::from_yaml`] ignores those comments.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::Duration;

use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};

use super::duration::{format_duration, go_duration};
use super::ValidationError;
use crate::constants::{
    ARBITER_NODE_LABEL_KEY, ARBITER_NODE_LABEL_VALUE, ARBITER_NODE_TYPE, ARBITER_TOLERATION_KEY,
    DEDICATED_STORAGE_NODE_TYPE, DEDICATED_WORKER_NODE_TYPE, DEFAULT_FLAKY_THRESHOLD,
    DEFAULT_NGINX_IMAGE, DEFAULT_NODE_TYPE, DEFAULT_OSDS_PER_NODE,
    DEFAULT_OTHER_DAEMONS_PER_NODE, DEFAULT_RESOURCE_TIMEOUT, DEFAULT_VALIDATION_NAMESPACE,
    ENV_POD_NAMESPACE, MIN_FLAKY_THRESHOLD, MIN_RESOURCE_TIMEOUT, STORAGE_NODE_LABEL_KEY,
    STORAGE_NODE_LABEL_VALUE,
};

/// Non-OSD clients on a dedicated worker node (CSI plugins only)
const DEDICATED_WORKER_OTHER_DAEMONS: u32 = 6;

/// Non-OSD clients on the arbiter node (1 mon, plus all 9 CSI provisioners and plugins)
const ARBITER_OTHER_DAEMONS: u32 = 10;

/// Longest name Kubernetes accepts for a DNS-1123 subdomain
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

/// Names of the built-in config templates, as accepted by `validation config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigTemplate {
    Converged,
    DedicatedStorageNodes,
    StretchCluster,
}

impl ConfigTemplate {
    #[must_use]
    pub fn config(self) -> ValidationTestConfig {
        match self {
            Self::Converged => ValidationTestConfig::converged(),
            Self::DedicatedStorageNodes => ValidationTestConfig::dedicated_storage_nodes(),
            Self::StretchCluster => ValidationTestConfig::stretch_cluster(),
        }
    }
}

/// Scheduling constraints for one node type.
///
/// Only a node selector and tolerations are offered. Affinity rules are too loose to pin
/// an exact number of clients to each node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacementConfig {
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

/// Clients to run on every node of one type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Clients attached to both public and cluster networks
    pub osds_per_node: u32,
    /// Clients attached to the public network only
    pub other_daemons_per_node: u32,
    pub placement: PlacementConfig,
}

/// Full validation test configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationTestConfig {
    pub namespace: String,
    pub public_network: String,
    pub cluster_network: String,
    #[serde(with = "go_duration")]
    pub resource_timeout: Duration,
    #[serde(with = "go_duration")]
    pub flaky_threshold: Duration,
    pub nginx_image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub host_check_only: bool,
    pub node_types: BTreeMap<String, NodeConfig>,
}

/// Namespace used when none is given: the pod's own namespace if known.
#[must_use]
pub fn default_namespace() -> String {
    std::env::var(ENV_POD_NAMESPACE)
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_VALIDATION_NAMESPACE.to_string())
}

fn dedicated_storage_node_config() -> NodeConfig {
    NodeConfig {
        osds_per_node: DEFAULT_OSDS_PER_NODE,
        other_daemons_per_node: DEFAULT_OTHER_DAEMONS_PER_NODE,
        placement: PlacementConfig {
            node_selector: BTreeMap::from([(
                STORAGE_NODE_LABEL_KEY.to_string(),
                STORAGE_NODE_LABEL_VALUE.to_string(),
            )]),
            tolerations: vec![Toleration {
                key: Some(STORAGE_NODE_LABEL_KEY.to_string()),
                value: Some(STORAGE_NODE_LABEL_VALUE.to_string()),
                ..Toleration::default()
            }],
        },
    }
}

fn dedicated_worker_node_config() -> NodeConfig {
    NodeConfig {
        osds_per_node: 0,
        other_daemons_per_node: DEDICATED_WORKER_OTHER_DAEMONS,
        placement: PlacementConfig::default(),
    }
}

impl ValidationTestConfig {
    fn with_node_types(node_types: BTreeMap<String, NodeConfig>) -> Self {
        Self {
            namespace: default_namespace(),
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
            flaky_threshold: DEFAULT_FLAKY_THRESHOLD,
            nginx_image: DEFAULT_NGINX_IMAGE.to_string(),
            node_types,
            ..Self::default()
        }
    }

    /// Converged layout: one node type with no placement.
    #[must_use]
    pub fn converged() -> Self {
        Self::with_node_types(BTreeMap::from([(
            DEFAULT_NODE_TYPE.to_string(),
            NodeConfig {
                osds_per_node: DEFAULT_OSDS_PER_NODE,
                other_daemons_per_node: DEFAULT_OTHER_DAEMONS_PER_NODE,
                placement: PlacementConfig::default(),
            },
        )]))
    }

    /// Storage nodes labeled and tainted `storage-node=true`, plus untainted workers.
    #[must_use]
    pub fn dedicated_storage_nodes() -> Self {
        Self::with_node_types(BTreeMap::from([
            (
                DEDICATED_STORAGE_NODE_TYPE.to_string(),
                dedicated_storage_node_config(),
            ),
            (
                DEDICATED_WORKER_NODE_TYPE.to_string(),
                dedicated_worker_node_config(),
            ),
        ]))
    }

    /// Dedicated storage layout plus an arbiter node in zone `arbiter`.
    #[must_use]
    pub fn stretch_cluster() -> Self {
        let mut config = Self::dedicated_storage_nodes();
        config.node_types.insert(
            ARBITER_NODE_TYPE.to_string(),
            NodeConfig {
                osds_per_node: 0,
                other_daemons_per_node: ARBITER_OTHER_DAEMONS,
                placement: PlacementConfig {
                    node_selector: BTreeMap::from([(
                        ARBITER_NODE_LABEL_KEY.to_string(),
                        ARBITER_NODE_LABEL_VALUE.to_string(),
                    )]),
                    tolerations: vec![Toleration {
                        key: Some(ARBITER_TOLERATION_KEY.to_string()),
                        operator: Some("Exists".to_string()),
                        ..Toleration::default()
                    }],
                },
            },
        );
        config
    }

    /// Load a config from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if the YAML does not describe a config.
    pub fn from_yaml(yaml: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ValidationError::InvalidConfig(format!("failed to unmarshal config from yaml: {e}"))
        })
    }

    /// Total OSD-like clients per node across node types.
    #[must_use]
    pub fn total_osds_per_node(&self) -> u32 {
        self.node_types.values().map(|n| n.osds_per_node).sum()
    }

    #[must_use]
    pub fn total_other_daemons_per_node(&self) -> u32 {
        self.node_types.values().map(|n| n.other_daemons_per_node).sum()
    }

    #[must_use]
    pub fn total_daemons_per_node(&self) -> u32 {
        self.total_osds_per_node() + self.total_other_daemons_per_node()
    }

    /// Clients that will run on each node of `node_type`.
    ///
    /// Public-only clients are only started when a public network is configured.
    #[must_use]
    pub fn clients_per_node(&self, node_type: &str) -> u32 {
        self.node_types.get(node_type).map_or(0, |n| {
            if self.public_network.is_empty() {
                n.osds_per_node
            } else {
                n.osds_per_node + n.other_daemons_per_node
            }
        })
    }

    /// Placement for the web server.
    ///
    /// The server must sit on a node with every network attached. Nodes that run OSDs have
    /// both, so the node type with the most OSDs is chosen, with more total daemons
    /// breaking ties.
    ///
    /// # Errors
    ///
    /// Fails when no node type runs OSDs.
    pub fn best_node_placement_for_server(&self) -> Result<PlacementConfig, ValidationError> {
        let best = self.node_types.values().fold(None::<&NodeConfig>, |best, n| match best {
            Some(b)
                if n.osds_per_node < b.osds_per_node
                    || (n.osds_per_node == b.osds_per_node
                        && n.other_daemons_per_node <= b.other_daemons_per_node) =>
            {
                Some(b)
            }
            _ => Some(n),
        });
        match best {
            Some(n) if n.osds_per_node > 0 => Ok(n.placement.clone()),
            _ => Err(ValidationError::InvalidConfig(
                "cannot place web server in cluster with no OSDs".to_string(),
            )),
        }
    }

    /// Report every configuration problem at once.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] listing all problems found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Vec::new();
        if self.namespace.is_empty() {
            errs.push("namespace must be specified".to_string());
        }
        if self.public_network.is_empty() && self.cluster_network.is_empty() {
            errs.push("at least one of publicNetwork and clusterNetwork must be specified".to_string());
        }
        if self.host_check_only && self.public_network.is_empty() {
            errs.push("hostCheckOnly requires publicNetwork to be specified".to_string());
        }
        if self.resource_timeout < MIN_RESOURCE_TIMEOUT {
            errs.push("resourceTimeout must be at least one minute (two or more are recommended)".to_string());
        }
        if self.flaky_threshold < MIN_FLAKY_THRESHOLD {
            errs.push(format!(
                "flakyThreshold must be at least {}",
                format_duration(MIN_FLAKY_THRESHOLD)
            ));
        }
        if self.nginx_image.is_empty() {
            errs.push("nginxImage must be specified".to_string());
        }
        if self.node_types.is_empty() {
            errs.push("at least one nodeType must be specified".to_string());
        }
        if self.total_osds_per_node() == 0 {
            errs.push("osdsPerNode must be set in at least one config".to_string());
        }
        // A zero total of other daemons is fine: OSD clients attach to every network.
        for node_type in self.node_types.keys() {
            let problems = dns1123_subdomain_errors(node_type);
            if !problems.is_empty() {
                errs.push(format!(
                    "nodeType identifier {node_type:?} must meet RFC 1123 requirements: [{}]",
                    problems.join("; ")
                ));
            }
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::InvalidConfig(format!(
                "validation test config is invalid: {}",
                errs.join(", ")
            )))
        }
    }

    /// Render the config as YAML with a usage comment above every field.
    ///
    /// # Errors
    ///
    /// Fails only if placement values cannot be serialized.
    pub fn to_yaml(&self) -> Result<String, ValidationError> {
        let mut tolerations = BTreeMap::new();
        for (name, node) in &self.node_types {
            let rendered = node
                .placement
                .tolerations
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    ValidationError::InvalidConfig(format!("failed to convert toleration into JSON: {e}"))
                })?;
            tolerations.insert(name.as_str(), rendered);
        }

        let mut out = String::new();
        self.write_yaml(&mut out, &tolerations).map_err(|e| {
            ValidationError::InvalidConfig(format!("failed to render validation test config: {e}"))
        })?;
        Ok(out)
    }

    /// Write the commented YAML form to `out`; `tolerations` holds each node type's
    /// tolerations already encoded as inline JSON.
    fn write_yaml(
        &self,
        out: &mut impl Write,
        tolerations: &BTreeMap<&str, Vec<String>>,
    ) -> fmt::Result {
        let quoted = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"));

        writeln!(out, "# The intended namespace where the validation test will be run. This is recommended to be where")?;
        writeln!(out, "# the Rook-Ceph cluster will be installed.")?;
        writeln!(out, "namespace: {}", quoted(&self.namespace))?;
        writeln!(out)?;
        writeln!(out, "# The Network Attachment Definition (NAD) that will be used for the Ceph public network.")?;
        writeln!(out, "# This should be a namespaced name in the form <namespace>/<name> if the NAD is defined in a")?;
        writeln!(out, "# different namespace from the cluster namespace.")?;
        writeln!(out, "publicNetwork: {}", quoted(&self.public_network))?;
        writeln!(out)?;
        writeln!(out, "# The NAD that will be used for the Ceph cluster network, in the same form as publicNetwork.")?;
        writeln!(out, "clusterNetwork: {}", quoted(&self.cluster_network))?;
        writeln!(out)?;
        writeln!(out, "# The time to wait for resources to change to the expected state. For example, for the test")?;
        writeln!(out, "# web server to start, for test clients to become ready, or for test resources to be deleted.")?;
        writeln!(out, "# At longest, this may need to reflect the time it takes for client pods to pull images, get")?;
        writeln!(out, "# address assignments, and then for each client to determine that its network connection is")?;
        writeln!(out, "# stable. Minimum: 1m0s. Recommended: 2m0s or more.")?;
        writeln!(out, "resourceTimeout: {}", format_duration(self.resource_timeout))?;
        writeln!(out)?;
        writeln!(out, "# The time threshold between the first client becoming ready and the last client becoming")?;
        writeln!(out, "# ready. Longer spreads suggest a flaky or overloaded network. Minimum: 1s.")?;
        writeln!(out, "flakyThreshold: {}", format_duration(self.flaky_threshold))?;
        writeln!(out)?;
        writeln!(out, "# The Nginx image used for the web server, clients and host checkers.")?;
        writeln!(out, "nginxImage: {}", quoted(&self.nginx_image))?;
        if !self.service_account_name.is_empty() {
            writeln!(out)?;
            writeln!(out, "# The service account every test pod runs as.")?;
            writeln!(out, "serviceAccountName: {}", quoted(&self.service_account_name))?;
        }
        if self.host_check_only {
            writeln!(out)?;
            writeln!(out, "# Only check that hosts can reach the web server on the public network; start no clients.")?;
            writeln!(out, "hostCheckOnly: true")?;
        }
        writeln!(out)?;
        writeln!(out, "# Node types are groups of nodes that run the same Ceph daemons. Each node type gets its own")?;
        writeln!(out, "# clients, placed with the node type's node selector and tolerations. Node types must not")?;
        writeln!(out, "# overlap: every node may belong to at most one node type.")?;
        writeln!(out, "nodeTypes:")?;
        for (name, node) in &self.node_types {
            writeln!(out, "  {name}:")?;
            writeln!(out, "    # The number of OSD daemons that may run on each node of this type in the worst case.")?;
            writeln!(out, "    osdsPerNode: {}", node.osds_per_node)?;
            writeln!(out, "    # The number of non-OSD daemons (mons, mgrs, MDSes, RGWs, CSI plugins and provisioners,")?;
            writeln!(out, "    # ...) that may run on each node of this type in the worst case.")?;
            writeln!(out, "    otherDaemonsPerNode: {}", node.other_daemons_per_node)?;
            writeln!(out, "    placement:")?;
            writeln!(out, "      # Node labels selecting the nodes of this type.")?;
            writeln!(out, "      nodeSelector:{}", if node.placement.node_selector.is_empty() { " {}" } else { "" })?;
            for (key, value) in &node.placement.node_selector {
                writeln!(out, "        {}: {}", quoted(key), quoted(value))?;
            }
            writeln!(out, "      # Tolerations for taints on the nodes of this type.")?;
            writeln!(out, "      tolerations:{}", if node.placement.tolerations.is_empty() { " []" } else { "" })?;
            for json in tolerations.get(name.as_str()).into_iter().flatten() {
                writeln!(out, "        - {json}")?;
            }
        }
        Ok(())
    }
}

/// Problems that keep `value` from being a DNS-1123 subdomain; empty when it is one.
#[must_use]
pub fn dns1123_subdomain_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errs.push(format!(
            "must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"
        ));
    }
    let label_ok = |label: &str| {
        let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        !label.is_empty()
            && label.starts_with(alnum)
            && label.ends_with(alnum)
            && label.chars().all(|c| alnum(c) || c == '-')
    };
    if !value.split('.').all(label_ok) {
        errs.push(
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

impl std::fmt::Display for ValidationTestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_yaml::to_string(self) {
            Ok(yaml) => f.write_str(&yaml),
            Err(_) => f.write_str("failed quick marshal of validation test config!"),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
