// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation test resource builders
//!
//! This module renders every Kubernetes object the validation test creates: the owner
//! `ConfigMap`, the web server and its nginx config, and the image-pull, client and
//! host-checker `DaemonSet`s. All functions are pure and easily testable.
//!
//! Every object other than the owner carries an owner reference to it, so deleting the
//! owner in the foreground removes the whole test.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, ExecAction, HTTPGetAction, Pod,
    PodSpec, PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use super::config::{PlacementConfig, ValidationTestConfig};
use super::networks::{url_host, ServerAddresses, TestNetworks};
use super::ValidationError;
use crate::constants::{
    OWNER_CONFIG_MAP_NAME, TEST_RESOURCE_PREFIX, WEB_SERVER_CONFIG_MAP_NAME, WEB_SERVER_POD_NAME,
    WEB_SERVER_PORT,
};
use crate::labels::{
    APP_LABEL, CLIENT_APP_LABEL_VALUE, CLIENT_ID_LABEL, CLIENT_TYPE_LABEL, CLIENT_TYPE_NON_OSD,
    CLIENT_TYPE_OSD, HOST_CHECKER_APP_LABEL_VALUE, IMAGE_PULL_APP_LABEL_VALUE, K8S_COMPONENT,
    K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_MULTUS_VALIDATION, NETWORKS_ANNOTATION,
    NODE_TYPE_LABEL, PART_OF_MULTUS_VALIDATION, WEB_SERVER_APP_LABEL_VALUE,
};

/// Key of the nginx server config inside the web server `ConfigMap`
const NGINX_CONFIG_KEY: &str = "default.conf";

/// Directory nginx loads server configs from
const NGINX_CONFIG_DIR: &str = "/etc/nginx/conf.d";

const NGINX_CONFIG_VOLUME: &str = "nginx-config";

/// Keeps a pod alive without listening on any port, so host-network pods cannot collide
const SLEEP_FOREVER_SCRIPT: &str = "trap 'exit 0' TERM; while true; do sleep 5; done";

/// Seconds between readiness checks; also bounds how precisely the flaky check can measure
const READINESS_PERIOD_SECONDS: i32 = 2;

/// Seconds a single readiness check may take
const READINESS_TIMEOUT_SECONDS: i32 = 2;

/// Role of a client, deciding which networks it attaches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientType {
    /// Simulates an OSD: public and cluster networks
    Osd,
    /// Simulates any other daemon: public network only
    NonOsd,
}

impl ClientType {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Osd => CLIENT_TYPE_OSD,
            Self::NonOsd => CLIENT_TYPE_NON_OSD,
        }
    }

    #[must_use]
    pub fn attaches_cluster_network(self) -> bool {
        matches!(self, Self::Osd)
    }
}

/// Labels shared by every test object, plus `app=<app>`.
#[must_use]
pub fn build_test_labels(app: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), app.to_string()),
        (K8S_COMPONENT.to_string(), component.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_MULTUS_VALIDATION.to_string()),
        (
            K8S_MANAGED_BY.to_string(),
            MANAGED_BY_MULTUS_VALIDATION.to_string(),
        ),
    ])
}

/// The owner `ConfigMap`; it holds no data.
#[must_use]
pub fn build_owner_config_map(namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(OWNER_CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(build_test_labels(TEST_RESOURCE_PREFIX, "owner")),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Owner references pointing at the created owner `ConfigMap`.
///
/// Deletion of the owner is blocked until every dependent is gone, which is what lets
/// cleanup wait for the whole test to disappear.
///
/// # Errors
///
/// Fails if the created owner has no UID.
pub fn build_owner_references(owner: &ConfigMap) -> Result<Vec<OwnerReference>, ValidationError> {
    let uid = owner.metadata.uid.clone().ok_or_else(|| {
        ValidationError::Fatal(format!(
            "owner config map {OWNER_CONFIG_MAP_NAME:?} was created without a UID"
        ))
    })?;
    Ok(vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: owner
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| OWNER_CONFIG_MAP_NAME.to_string()),
        uid,
        block_owner_deletion: Some(true),
        controller: None,
    }])
}

fn nginx_config() -> String {
    format!(
        r"server {{
    listen {WEB_SERVER_PORT};
    listen [::]:{WEB_SERVER_PORT};
    server_name _;

    location / {{
        default_type text/plain;
        return 200 'multus validation test web server\n';
    }}
}}
"
    )
}

/// Web server nginx config.
#[must_use]
pub fn build_web_server_config_map(namespace: &str, owners: &[OwnerReference]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(WEB_SERVER_CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(build_test_labels(WEB_SERVER_APP_LABEL_VALUE, "web-server")),
            owner_references: Some(owners.to_vec()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(NGINX_CONFIG_KEY.to_string(), nginx_config())])),
        ..Default::default()
    }
}

fn networks_annotation(value: String) -> Option<BTreeMap<String, String>> {
    if value.is_empty() {
        return None;
    }
    Some(BTreeMap::from([(NETWORKS_ANNOTATION.to_string(), value)]))
}

fn pod_spec(
    config: &ValidationTestConfig,
    placement: &PlacementConfig,
    container: Container,
) -> PodSpec {
    PodSpec {
        containers: vec![container],
        node_selector: (!placement.node_selector.is_empty())
            .then(|| placement.node_selector.clone()),
        tolerations: (!placement.tolerations.is_empty()).then(|| placement.tolerations.clone()),
        service_account_name: (!config.service_account_name.is_empty())
            .then(|| config.service_account_name.clone()),
        termination_grace_period_seconds: Some(0),
        ..Default::default()
    }
}

fn sleeping_container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            SLEEP_FOREVER_SCRIPT.to_string(),
        ]),
        ..Default::default()
    }
}

/// Readiness check that fetches the web server at every address in `hosts`.
fn web_server_readiness_check(hosts: &[&str]) -> Probe {
    let script = hosts
        .iter()
        .map(|host| {
            format!(
                "curl --silent --show-error --fail --connect-timeout {READINESS_TIMEOUT_SECONDS} \
                 --output /dev/null http://{}:{WEB_SERVER_PORT}",
                url_host(host)
            )
        })
        .collect::<Vec<_>>()
        .join(" && ");
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        }),
        period_seconds: Some(READINESS_PERIOD_SECONDS),
        timeout_seconds: Some(READINESS_TIMEOUT_SECONDS + 1),
        failure_threshold: Some(1),
        ..Default::default()
    }
}

/// Web server pod, attached to every configured network.
#[must_use]
pub fn build_web_server_pod(
    config: &ValidationTestConfig,
    networks: &TestNetworks,
    placement: &PlacementConfig,
    owners: &[OwnerReference],
) -> Pod {
    debug!(namespace = %config.namespace, "Building web server pod");

    let container = Container {
        name: "web-server".to_string(),
        image: Some(config.nginx_image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: WEB_SERVER_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: NGINX_CONFIG_VOLUME.to_string(),
            mount_path: NGINX_CONFIG_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".to_string()),
                port: IntOrString::Int(WEB_SERVER_PORT),
                ..Default::default()
            }),
            period_seconds: Some(READINESS_PERIOD_SECONDS),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut spec = pod_spec(config, placement, container);
    spec.volumes = Some(vec![Volume {
        name: NGINX_CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: WEB_SERVER_CONFIG_MAP_NAME.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }]);

    Pod {
        metadata: ObjectMeta {
            name: Some(WEB_SERVER_POD_NAME.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(build_test_labels(WEB_SERVER_APP_LABEL_VALUE, "web-server")),
            annotations: networks_annotation(networks.annotation(true, true)),
            owner_references: Some(owners.to_vec()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

fn daemon_set(
    name: String,
    namespace: &str,
    labels: BTreeMap<String, String>,
    selector_keys: &[&str],
    annotations: Option<BTreeMap<String, String>>,
    spec: PodSpec,
    owners: &[OwnerReference],
) -> DaemonSet {
    let match_labels: BTreeMap<String, String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() == APP_LABEL || selector_keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(owners.to_vec()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Image-pull daemonset for one node type.
///
/// It runs the test image with no Multus networks so every node has the image before any
/// timing-sensitive phase starts.
#[must_use]
pub fn build_image_pull_daemon_set(
    config: &ValidationTestConfig,
    node_type: &str,
    placement: &PlacementConfig,
    owners: &[OwnerReference],
) -> DaemonSet {
    let mut labels = build_test_labels(IMAGE_PULL_APP_LABEL_VALUE, "image-pull");
    labels.insert(NODE_TYPE_LABEL.to_string(), node_type.to_string());

    daemon_set(
        format!("{TEST_RESOURCE_PREFIX}-image-pull-{node_type}"),
        &config.namespace,
        labels,
        &[NODE_TYPE_LABEL],
        None,
        pod_spec(
            config,
            placement,
            sleeping_container("image-pull", &config.nginx_image),
        ),
        owners,
    )
}

/// Client daemonset `id` of `client_type` for one node type.
///
/// The client becomes ready once it can fetch the web server over every network it is
/// attached to.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_client_daemon_set(
    config: &ValidationTestConfig,
    networks: &TestNetworks,
    server: &ServerAddresses,
    node_type: &str,
    client_type: ClientType,
    id: u32,
    placement: &PlacementConfig,
    owners: &[OwnerReference],
) -> DaemonSet {
    let attach_cluster = client_type.attaches_cluster_network();
    let mut hosts = Vec::with_capacity(2);
    hosts.extend(server.public.as_deref());
    if attach_cluster {
        hosts.extend(server.cluster.as_deref());
    }

    let mut container = sleeping_container("client", &config.nginx_image);
    container.readiness_probe = Some(web_server_readiness_check(&hosts));

    let mut labels = build_test_labels(CLIENT_APP_LABEL_VALUE, "client");
    labels.insert(NODE_TYPE_LABEL.to_string(), node_type.to_string());
    labels.insert(CLIENT_TYPE_LABEL.to_string(), client_type.label().to_string());
    labels.insert(CLIENT_ID_LABEL.to_string(), id.to_string());

    daemon_set(
        format!(
            "{TEST_RESOURCE_PREFIX}-client-{node_type}-{}-{id}",
            client_type.label()
        ),
        &config.namespace,
        labels,
        &[NODE_TYPE_LABEL, CLIENT_TYPE_LABEL, CLIENT_ID_LABEL],
        networks_annotation(networks.annotation(true, attach_cluster)),
        pod_spec(config, placement, container),
        owners,
    )
}

/// Host-checker daemonset for one node type.
///
/// Runs in the host network namespace and becomes ready once the host can reach the web
/// server's public address.
#[must_use]
pub fn build_host_checker_daemon_set(
    config: &ValidationTestConfig,
    server_public_addr: &str,
    node_type: &str,
    placement: &PlacementConfig,
    owners: &[OwnerReference],
) -> DaemonSet {
    let mut container = sleeping_container("host-checker", &config.nginx_image);
    container.readiness_probe = Some(web_server_readiness_check(&[server_public_addr]));

    let mut spec = pod_spec(config, placement, container);
    spec.host_network = Some(true);

    let mut labels = build_test_labels(HOST_CHECKER_APP_LABEL_VALUE, "host-checker");
    labels.insert(NODE_TYPE_LABEL.to_string(), node_type.to_string());

    daemon_set(
        format!("{TEST_RESOURCE_PREFIX}-host-checker-{node_type}"),
        &config.namespace,
        labels,
        &[NODE_TYPE_LABEL],
        None,
        spec,
        owners,
    )
}

#[cfg(test)]
#[path = "templates_tests.rs"]
mod templates_tests;
