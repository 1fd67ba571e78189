// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Parsing of the Multus network-status pod annotation.
//!
//! Multus writes a JSON list describing every attachment it made to the pod, including the
//! cluster's default network. Both the mover (to find a holder's secondary interface) and
//! the validation test (to find the web server's addresses) read it.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::{LEGACY_NETWORKS_STATUS_ANNOTATION, NETWORK_STATUS_ANNOTATION};

/// One attachment reported by Multus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Network name, `ns/name` for secondary networks
    pub name: String,
    /// Interface name inside the pod
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub mac: Option<String>,
    /// Set on the cluster's default network
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Error)]
pub enum NetworkStatusError {
    #[error("pod {pod:?} has no network status annotation yet")]
    Missing { pod: String },

    #[error("failed to parse network status annotation of pod {pod:?}: {source}")]
    Parse {
        pod: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pod {pod:?} has {count} secondary networks attached; expected exactly one")]
    NotExactlyOne { pod: String, count: usize },

    #[error("network {network:?} on pod {pod:?} does not report an interface name")]
    NoInterface { pod: String, network: String },
}

/// Every attachment on `pod`, including the default network.
///
/// # Errors
///
/// Fails when the annotation is absent or is not a JSON list of network statuses.
pub fn pod_network_statuses(pod: &Pod) -> Result<Vec<NetworkStatus>, NetworkStatusError> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let raw = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| {
            a.get(NETWORK_STATUS_ANNOTATION)
                .or_else(|| a.get(LEGACY_NETWORKS_STATUS_ANNOTATION))
        })
        .ok_or_else(|| NetworkStatusError::Missing { pod: name.clone() })?;

    serde_json::from_str(raw).map_err(|source| NetworkStatusError::Parse { pod: name, source })
}

/// Attachments on `pod` other than the default network.
///
/// # Errors
///
/// See [`pod_network_statuses`].
pub fn secondary_networks(pod: &Pod) -> Result<Vec<NetworkStatus>, NetworkStatusError> {
    Ok(pod_network_statuses(pod)?
        .into_iter()
        .filter(|s| !s.default)
        .collect())
}

/// The single secondary network attached to `pod`.
///
/// # Errors
///
/// Fails when the annotation is unusable or there is not exactly one secondary network.
pub fn single_secondary_network(pod: &Pod) -> Result<NetworkStatus, NetworkStatusError> {
    let mut networks = secondary_networks(pod)?;
    if networks.len() != 1 {
        return Err(NetworkStatusError::NotExactlyOne {
            pod: pod.metadata.name.clone().unwrap_or_default(),
            count: networks.len(),
        });
    }
    Ok(networks.remove(0))
}

#[cfg(test)]
#[path = "network_status_tests.rs"]
mod network_status_tests;
