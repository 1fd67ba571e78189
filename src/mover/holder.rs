// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Helpers for reading holder pods.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::labels::{APP_LABEL, HOLDER_APP_LABEL_VALUE};
use crate::network_status::{single_secondary_network, NetworkStatusError};

/// The holder's Multus attachment as reported by Multus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HolderNetwork {
    /// Network name, `ns/name`
    pub network: String,
    /// Interface name inside the holder's namespace
    pub interface: String,
    /// MAC address reported by Multus, if any
    pub mac: Option<String>,
}

/// Whether `pod` is a holder pod scheduled on `node_name`.
#[must_use]
pub fn is_holder_pod_on_node(pod: &Pod, node_name: &str) -> bool {
    let on_node = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| n == node_name);
    on_node
        && pod
            .labels()
            .get(APP_LABEL)
            .is_some_and(|app| app == HOLDER_APP_LABEL_VALUE)
}

/// Whether the pod has been marked for deletion.
#[must_use]
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// The pod's cluster IP, once the CNI has assigned one.
#[must_use]
pub fn holder_pod_ip(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
}

/// The single secondary network attached to a holder.
///
/// # Errors
///
/// Fails while Multus has not yet reported exactly one secondary network with an
/// interface name. This is normal for a pod that is still being wired up.
pub fn holder_network(pod: &Pod) -> Result<HolderNetwork, NetworkStatusError> {
    let status = single_secondary_network(pod)?;
    let interface = status
        .interface
        .filter(|i| !i.is_empty())
        .ok_or_else(|| NetworkStatusError::NoInterface {
            pod: pod.name_any(),
            network: status.name.clone(),
        })?;
    Ok(HolderNetwork {
        network: status.name,
        interface,
        mac: status.mac,
    })
}

#[cfg(test)]
#[path = "holder_tests.rs"]
mod holder_tests;
