// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Holder pod builders shared by the mover tests.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use kube::api::ObjectMeta;

use crate::labels::{APP_LABEL, HOLDER_APP_LABEL_VALUE, NETWORK_STATUS_ANNOTATION};

pub const NODE: &str = "node-a";

/// Network status of a holder with one macvlan attachment on `net1`.
pub fn one_network_status(ip: &str, mac: &str) -> String {
    format!(
        r#"[{{"name":"cbr0","interface":"eth0","ips":["10.1.2.3"],"default":true}},
            {{"name":"rook-ceph/public-net","interface":"net1","ips":["{ip}"],"mac":"{mac}"}}]"#
    )
}

pub fn holder_pod(name: &str, pod_ip: Option<&str>, network_status: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("rook-ceph".to_string()),
            labels: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                HOLDER_APP_LABEL_VALUE.to_string(),
            )])),
            annotations: network_status.map(|s| {
                BTreeMap::from([(NETWORK_STATUS_ANNOTATION.to_string(), s.to_string())])
            }),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some(NODE.to_string()),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            pod_ip: pod_ip.map(str::to_string),
            ..PodStatus::default()
        }),
    }
}

/// The default scenario: IP `10.1.2.3`, `net1` with `d6:2f:2b:3f:8f:33`.
pub fn ready_holder_pod(name: &str) -> Pod {
    holder_pod(
        name,
        Some("10.1.2.3"),
        Some(&one_network_status("192.168.20.7", "d6:2f:2b:3f:8f:33")),
    )
}

pub fn terminating(mut pod: Pod) -> Pod {
    let meta: ObjectMeta =
        serde_json::from_str(r#"{"deletionTimestamp": "2025-06-01T12:00:00Z"}"#).unwrap();
    pod.metadata.deletion_timestamp = meta.deletion_timestamp;
    pod
}
