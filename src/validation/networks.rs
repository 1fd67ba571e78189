// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Network attachment names and the addresses Multus reports for them.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;

use super::ValidationError;
use crate::network_status::pod_network_statuses;

/// A Network Attachment Definition, always with its namespace resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetworkName {
    pub namespace: String,
    pub name: String,
}

impl NetworkName {
    /// Parse `name` or `namespace/name`; a bare name lives in `default_namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for empty parts or more than one `/`.
    pub fn parse(network: &str, default_namespace: &str) -> Result<Self, ValidationError> {
        let invalid = || {
            ValidationError::InvalidConfig(format!(
                "network {network:?} is not a valid NAD name; expected <name> or <namespace>/<name>"
            ))
        };
        let (namespace, name) = match network.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (default_namespace, network),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The networks a validation test attaches, resolved against the test namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestNetworks {
    pub public: Option<NetworkName>,
    pub cluster: Option<NetworkName>,
}

impl TestNetworks {
    /// # Errors
    ///
    /// Fails if a configured network name is malformed.
    pub fn resolve(
        public_network: &str,
        cluster_network: &str,
        namespace: &str,
    ) -> Result<Self, ValidationError> {
        let resolve = |network: &str| -> Result<Option<NetworkName>, ValidationError> {
            if network.is_empty() {
                Ok(None)
            } else {
                NetworkName::parse(network, namespace).map(Some)
            }
        };
        Ok(Self {
            public: resolve(public_network)?,
            cluster: resolve(cluster_network)?,
        })
    }

    /// Value for the Multus networks annotation: the selected networks as `ns/name`,
    /// separated by commas.
    #[must_use]
    pub fn annotation(&self, public: bool, cluster: bool) -> String {
        let mut names = Vec::with_capacity(2);
        if public {
            names.extend(self.public.as_ref().map(ToString::to_string));
        }
        if cluster {
            names.extend(self.cluster.as_ref().map(ToString::to_string));
        }
        names.join(",")
    }
}

/// Addresses of the web server on each configured network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerAddresses {
    pub node_name: String,
    pub public: Option<String>,
    pub cluster: Option<String>,
}

/// First address Multus reports for `desired` on `pod`.
///
/// # Errors
///
/// Fails when the pod has no usable network status or `desired` is not attached.
pub fn network_address(
    pod: &Pod,
    desired: &NetworkName,
    namespace: &str,
) -> Result<String, ValidationError> {
    let statuses = pod_network_statuses(pod).map_err(|e| ValidationError::NotReady(e.to_string()))?;
    statuses
        .iter()
        .filter(|s| !s.default)
        .find(|s| NetworkName::parse(&s.name, namespace).is_ok_and(|n| &n == desired))
        .and_then(|s| s.ips.first().cloned())
        .ok_or_else(|| {
            ValidationError::NotReady(format!(
                "failed to find address for network {desired} on pod {:?}",
                pod.metadata.name.as_deref().unwrap_or_default()
            ))
        })
}

/// `addr` in URL host form; IPv6 addresses are bracketed.
#[must_use]
pub fn url_host(addr: &str) -> String {
    if addr.contains(':') {
        format!("[{addr}]")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
#[path = "networks_tests.rs"]
mod networks_tests;
