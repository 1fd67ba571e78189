// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Multus mover and validation tool.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// Mover Constants
// ============================================================================

/// Name the mover controller logs under
pub const MOVER_CONTROLLER_NAME: &str = "multus-mover";

/// Prefix of interfaces cloned into the host network namespace (`rookm0`, `rookm1`, ...)
pub const MOVED_INTERFACE_PREFIX: &str = "rookm";

/// Requeue delay while a holder pod is still being wired up (no IP or network status yet)
pub const HOLDER_NOT_READY_REQUEUE: Duration = Duration::from_secs(2);

/// Base delay of the per-pod failure backoff
pub const MOVER_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Cap of the per-pod failure backoff
pub const MOVER_BACKOFF_MAX: Duration = Duration::from_secs(10);

// ============================================================================
// Network Namespace Constants
// ============================================================================

/// Directory holding one bind-mounted file per pod network namespace
pub const DEFAULT_NETNS_DIR: &str = "/var/run/netns";

/// Namespace file of the mover process itself (the host namespace, since it runs with host
/// networking)
pub const CURRENT_NETNS_PATH: &str = "/proc/self/ns/net";

/// `MACVLAN_MODE_BRIDGE`, assumed when the kernel omits the mode attribute
pub const MACVLAN_MODE_BRIDGE: u32 = 4;

/// `RT_TABLE_LOCAL`; its entries are generated by the kernel and never replayed
pub const LOCAL_ROUTE_TABLE: u32 = 255;

// ============================================================================
// Environment Variables
// ============================================================================

/// Node the mover runs on
pub const ENV_NODE_NAME: &str = "NODE_NAME";

/// Namespace of the mover pod and of the holder pods it watches. Also the default namespace
/// for validation tests.
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";

/// Overrides [`DEFAULT_NETNS_DIR`]
pub const ENV_NETNS_DIR: &str = "MULTUS_NETNS_DIR";

// ============================================================================
// Validation Test Defaults
// ============================================================================

/// Namespace used when neither a flag nor `POD_NAMESPACE` names one
pub const DEFAULT_VALIDATION_NAMESPACE: &str = "rook-ceph";

/// OSD-like clients per node in the default node type
pub const DEFAULT_OSDS_PER_NODE: u32 = 3;

/// Non-OSD clients per node in the default node type
pub const DEFAULT_OTHER_DAEMONS_PER_NODE: u32 = 16;

/// Image for the web server, image pullers, clients and host checkers
pub const DEFAULT_NGINX_IMAGE: &str = "nginxinc/nginx-unprivileged:stable-alpine";

/// Per-phase timeout
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Lower bound on the per-phase timeout
pub const MIN_RESOURCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest acceptable spread between the first and the last client becoming ready
pub const DEFAULT_FLAKY_THRESHOLD: Duration = Duration::from_secs(20);

/// Lower bound on the flakiness threshold
pub const MIN_FLAKY_THRESHOLD: Duration = Duration::from_secs(1);

/// How long the scheduled image-pull pod count must stay unchanged before it is trusted
pub const POD_SCHEDULER_DEBOUNCE: Duration = Duration::from_secs(30);

/// Delay between retries of a state that returned a non-fatal error
pub const STATE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Poll interval while waiting for test resources to be deleted
pub const CLEANUP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default node type of the converged template
pub const DEFAULT_NODE_TYPE: &str = "shared-storage-and-worker-nodes";

/// Storage node type of the dedicated-storage and stretch templates
pub const DEDICATED_STORAGE_NODE_TYPE: &str = "storage-nodes";

/// Worker node type of the dedicated-storage and stretch templates
pub const DEDICATED_WORKER_NODE_TYPE: &str = "worker-nodes";

/// Arbiter node type of the stretch template
pub const ARBITER_NODE_TYPE: &str = "arbiter-node";

/// Label (and taint) marking dedicated storage nodes
pub const STORAGE_NODE_LABEL_KEY: &str = "storage-node";

/// Value of [`STORAGE_NODE_LABEL_KEY`]
pub const STORAGE_NODE_LABEL_VALUE: &str = "true";

/// Zone label selecting the arbiter node
pub const ARBITER_NODE_LABEL_KEY: &str = "topology.kubernetes.io/zone";

/// Value of [`ARBITER_NODE_LABEL_KEY`]
pub const ARBITER_NODE_LABEL_VALUE: &str = "arbiter";

/// Taint tolerated on the arbiter node
pub const ARBITER_TOLERATION_KEY: &str = "node-role.kubernetes.io/control-plane";

// ============================================================================
// Validation Test Resources
// ============================================================================

/// Sentinel config map that owns every test object; deleting it cleans up the test
pub const OWNER_CONFIG_MAP_NAME: &str = "multus-validation-test-owner";

/// Prefix of every object the test creates
pub const TEST_RESOURCE_PREFIX: &str = "multus-validation-test";

/// Web server pod name
pub const WEB_SERVER_POD_NAME: &str = "multus-validation-test-web-server";

/// Web server nginx config map name
pub const WEB_SERVER_CONFIG_MAP_NAME: &str = "multus-validation-test-web-server-config";

/// Port nginx listens on in both server and client pods
pub const WEB_SERVER_PORT: i32 = 8080;

/// Exit code for configuration errors (`EINVAL`)
pub const EXIT_CODE_INVALID_CONFIG: i32 = 22;
