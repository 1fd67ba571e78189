// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants.
//!
//! This module defines the standard Kubernetes labels, the Multus annotations, and the
//! labels the mover and the validation test use to find their pods.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "web-server")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of` on every validation test object
pub const PART_OF_MULTUS_VALIDATION: &str = "multus-validation-test";

/// Value for `app.kubernetes.io/managed-by` on every validation test object
pub const MANAGED_BY_MULTUS_VALIDATION: &str = "multus-validation";

// ============================================================================
// App Labels
// ============================================================================

/// Label key that identifies what an object is for; selectors match on it
pub const APP_LABEL: &str = "app";

/// `app` value of holder pods that keep a Multus attachment alive for the CSI plugins
pub const HOLDER_APP_LABEL_VALUE: &str = "csi-multus-holder";

/// `app` value of the validation web server
pub const WEB_SERVER_APP_LABEL_VALUE: &str = "multus-validation-test-web-server";

/// `app` value of the image-pull daemonsets and pods
pub const IMAGE_PULL_APP_LABEL_VALUE: &str = "multus-validation-test-image-pull";

/// `app` value of the client daemonsets and pods
pub const CLIENT_APP_LABEL_VALUE: &str = "multus-validation-test-client";

/// `app` value of the host-checker daemonsets and pods
pub const HOST_CHECKER_APP_LABEL_VALUE: &str = "multus-validation-test-host-checker";

// ============================================================================
// Validation Test Labels
// ============================================================================

/// Label carrying the node type a daemonset (and its pods) was rendered for
pub const NODE_TYPE_LABEL: &str = "nodeType";

/// Label carrying the client role
pub const CLIENT_TYPE_LABEL: &str = "clientType";

/// Label carrying the client index within its node type and role
pub const CLIENT_ID_LABEL: &str = "clientID";

/// Client role attached to both public and cluster networks
pub const CLIENT_TYPE_OSD: &str = "osd";

/// Client role attached to the public network only
pub const CLIENT_TYPE_NON_OSD: &str = "other";

// ============================================================================
// Multus Annotations
// ============================================================================

/// Networks a pod asks Multus to attach, as `ns/name` pairs separated by commas
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Attachment results Multus writes back to the pod
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// Older spelling of [`NETWORK_STATUS_ANNOTATION`], still written by some Multus versions
pub const LEGACY_NETWORKS_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks-status";

/// Selector string for `app=<value>`.
#[must_use]
pub fn app_selector(value: &str) -> String {
    format!("{APP_LABEL}={value}")
}
