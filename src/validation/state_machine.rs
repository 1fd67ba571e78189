// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation test state machine.
//!
//! The test is a linear sequence of states. Each state inspects the cluster and returns
//! the suggestions that would explain a failure at that point, plus either a
//! [`Transition`] or an error:
//!
//! ```text
//! GetExpectedImagePullPods -> VerifyImagePullersRunning -> DeleteImagePullers
//!   -> GetWebServerInfo -> StartClients -> VerifyPodsRunning(clients)
//!   -> VerifyPodsReady(clients) -> exit
//! ```
//!
//! With `hostCheckOnly`, `StartClients` and the client checks are replaced by
//! `StartHostCheckers` and the same checks over host checkers.
//!
//! Every state gets the full resource timeout; the timer restarts on each transition.
//! Non-fatal errors are retried every two seconds and the last one is reported on timeout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ValidationTestConfig;
use super::duration::format_duration;
use super::networks::{network_address, ServerAddresses, TestNetworks};
use super::resources::{pod_is_ready, TestResources};
use super::{ValidationError, ValidationTestResults};
use crate::constants::{POD_SCHEDULER_DEBOUNCE, STATE_RETRY_DELAY};
use crate::labels::{
    app_selector, CLIENT_APP_LABEL_VALUE, HOST_CHECKER_APP_LABEL_VALUE, IMAGE_PULL_APP_LABEL_VALUE,
};

pub const FLAKY_NETWORK_SUGGESTION: &str = "the underlying network may be flaky or not have the \
     bandwidth to support a production ceph cluster; even if the validation test passes, this \
     could still be an issue";

const COLLOCATION_SUGGESTION: &str = "if clients on the same node as the web server become ready \
     but not others, there may be a network firewall or security policy blocking inter-node \
     traffic on multus networks";

const SCHEDULING_SUGGESTION: &str =
    "inability to schedule DaemonSets is likely an issue with the Kubernetes cluster itself";

/// Suggestions for any phase that needs Multus to hand out addresses.
#[must_use]
pub fn unable_to_provide_address_suggestions() -> Vec<String> {
    [
        "multus may be unable to provide addresses for pods",
        "check networking events on the pod and multus logs",
        "macvlan: NIC or switch hardware/software may block the association of some number of \
         additional MAC addresses on an interface",
        "macvlan: interfaces and network switching must enable promiscuous mode to allow \
         receiving packets for unknown (Multus) MACs",
        "macvlan/ipvlan: switch hardware/software may block an interface from receiving packets \
         to an unknown (Multus) IP",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Everything a state may read.
pub struct StateContext<'a> {
    pub resources: &'a dyn TestResources,
    pub config: &'a ValidationTestConfig,
    pub networks: &'a TestNetworks,
    pub owners: &'a [OwnerReference],
}

pub enum Transition {
    /// Run the same state again after the retry delay
    Stay,
    Next(Box<dyn State>),
    /// The test finished successfully
    Exit,
}

/// Result of one run of a state.
pub struct StateOutput {
    pub suggestions: Vec<String>,
    pub result: Result<Transition, ValidationError>,
}

impl StateOutput {
    fn next(state: impl State + 'static) -> Self {
        Self {
            suggestions: Vec::new(),
            result: Ok(Transition::Next(Box::new(state))),
        }
    }

    fn stay() -> Self {
        Self {
            suggestions: Vec::new(),
            result: Ok(Transition::Stay),
        }
    }

    fn error(suggestions: Vec<String>, err: ValidationError) -> Self {
        Self {
            suggestions,
            result: Err(err),
        }
    }
}

#[async_trait]
pub trait State: Send {
    fn name(&self) -> String;

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput;
}

/// Pods the test waits on after the image pull phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodGroup {
    Clients,
    HostCheckers,
}

impl PodGroup {
    fn selector(self) -> String {
        match self {
            Self::Clients => app_selector(CLIENT_APP_LABEL_VALUE),
            Self::HostCheckers => app_selector(HOST_CHECKER_APP_LABEL_VALUE),
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::HostCheckers => "host checkers",
        }
    }

    fn not_running_suggestions(self) -> Vec<String> {
        match self {
            Self::Clients => {
                let mut s = vec![
                    "clients not being able to run can mean multus is unable to provide them \
                     with addresses"
                        .to_string(),
                ];
                s.extend(unable_to_provide_address_suggestions());
                s
            }
            Self::HostCheckers => vec![
                "host checkers use host networking; check that no policy prevents host network \
                 pods from running"
                    .to_string(),
            ],
        }
    }

    fn not_ready_suggestions(self) -> Vec<String> {
        match self {
            Self::Clients => {
                let mut s = vec![
                    COLLOCATION_SUGGESTION.to_string(),
                    FLAKY_NETWORK_SUGGESTION.to_string(),
                ];
                s.extend(unable_to_provide_address_suggestions());
                s
            }
            Self::HostCheckers => vec![
                "hosts may be unable to reach the public network; check that each host has a \
                 route to the multus public network (for example through a macvlan or ipvlan \
                 shim interface)"
                    .to_string(),
                COLLOCATION_SUGGESTION.to_string(),
            ],
        }
    }
}

/// State the test starts in.
#[must_use]
pub fn initial_state() -> Box<dyn State> {
    Box::new(GetExpectedImagePullPods::default())
}

/// 1. Wait for the scheduled image-pull pod count to settle.
#[derive(Default)]
pub struct GetExpectedImagePullPods {
    per_node_type: BTreeMap<String, u32>,
    changed_at: Option<Instant>,
}

#[async_trait]
impl State for GetExpectedImagePullPods {
    fn name(&self) -> String {
        "get expected number of image pull pods".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let counts = match ctx.resources.image_pull_pods_per_node_type().await {
            Ok(counts) => counts,
            Err(e) => {
                return StateOutput::error(
                    vec![SCHEDULING_SUGGESTION.to_string()],
                    ValidationError::NotReady(format!(
                        "expected number of image pull pods not yet ready: {e}"
                    )),
                )
            }
        };

        let now = Instant::now();
        if counts != self.per_node_type {
            self.per_node_type = counts;
            self.changed_at = Some(now);
        }
        let stable_for = self
            .changed_at
            .map_or(std::time::Duration::ZERO, |t| now.duration_since(t));
        let total: u32 = self.per_node_type.values().sum();
        if stable_for < POD_SCHEDULER_DEBOUNCE {
            info!(
                expected = total,
                "Waiting to ensure number of image pull pods stabilizes"
            );
            return StateOutput::stay();
        }

        info!(expected = total, "Expecting image pull pods");
        StateOutput::next(VerifyImagePullersRunning {
            per_node_type: std::mem::take(&mut self.per_node_type),
        })
    }
}

/// 2. Every image-pull pod is running, and node types do not overlap.
pub struct VerifyImagePullersRunning {
    per_node_type: BTreeMap<String, u32>,
}

#[async_trait]
impl State for VerifyImagePullersRunning {
    fn name(&self) -> String {
        "verify all image pull pods are running".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let suggestions = vec![
            format!(
                "image pull pods not running can mean the image {:?} cannot be pulled on some nodes",
                ctx.config.nginx_image
            ),
            SCHEDULING_SUGGESTION.to_string(),
        ];
        let expected: u32 = self.per_node_type.values().sum();
        let running = match ctx
            .resources
            .num_running_pods(&app_selector(IMAGE_PULL_APP_LABEL_VALUE))
            .await
        {
            Ok(n) => n,
            Err(e) => return StateOutput::error(suggestions, e),
        };
        if running != expected {
            return StateOutput::error(
                suggestions,
                ValidationError::NotReady(format!(
                    "{running} of {expected} image pull pods are running"
                )),
            );
        }
        if let Err(e) = ctx.resources.ensure_one_image_pull_pod_per_node().await {
            return StateOutput::error(Vec::new(), e);
        }

        info!(count = expected, "All image pull pods are running");
        StateOutput::next(DeleteImagePullers {
            per_node_type: std::mem::take(&mut self.per_node_type),
        })
    }
}

/// 3. Image pulls are done; remove the pullers.
pub struct DeleteImagePullers {
    per_node_type: BTreeMap<String, u32>,
}

#[async_trait]
impl State for DeleteImagePullers {
    fn name(&self) -> String {
        "delete image pullers".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        if let Err(e) = ctx
            .resources
            .delete_daemon_sets(&app_selector(IMAGE_PULL_APP_LABEL_VALUE))
            .await
        {
            return StateOutput::error(Vec::new(), e);
        }
        StateOutput::next(GetWebServerInfo {
            per_node_type: std::mem::take(&mut self.per_node_type),
        })
    }
}

/// 4. The web server is ready and has an address on every configured network.
pub struct GetWebServerInfo {
    per_node_type: BTreeMap<String, u32>,
}

#[async_trait]
impl State for GetWebServerInfo {
    fn name(&self) -> String {
        "get web server info".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let pod = match ctx.resources.get_web_server_pod().await {
            Ok(pod) => pod,
            Err(e) => return StateOutput::error(Vec::new(), e),
        };

        let namespace = &ctx.config.namespace;
        let mut server = ServerAddresses {
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            ..ServerAddresses::default()
        };
        for (desired, slot) in [
            (ctx.networks.public.as_ref(), &mut server.public),
            (ctx.networks.cluster.as_ref(), &mut server.cluster),
        ] {
            let Some(desired) = desired else { continue };
            match network_address(&pod, desired, namespace) {
                Ok(addr) => *slot = Some(addr),
                Err(e) => {
                    return StateOutput::error(
                        unable_to_provide_address_suggestions(),
                        ValidationError::NotReady(format!("no web server network info: {e}")),
                    )
                }
            }
        }

        if !pod_is_ready(&pod) {
            return StateOutput::error(
                Vec::new(),
                ValidationError::NotReady("web server pod is not ready yet".to_string()),
            );
        }

        info!(
            node = %server.node_name,
            public = ?server.public,
            cluster = ?server.cluster,
            "Web server is ready"
        );
        let per_node_type = std::mem::take(&mut self.per_node_type);
        if ctx.config.host_check_only {
            return match server.public {
                Some(public_addr) => StateOutput::next(StartHostCheckers {
                    public_addr,
                    per_node_type,
                }),
                None => StateOutput::error(
                    Vec::new(),
                    ValidationError::InvalidConfig(
                        "hostCheckOnly requires a public network".to_string(),
                    ),
                ),
            };
        }
        StateOutput::next(StartClients {
            server,
            per_node_type,
        })
    }
}

/// 5. Start the client daemonsets of every node type.
pub struct StartClients {
    server: ServerAddresses,
    per_node_type: BTreeMap<String, u32>,
}

#[async_trait]
impl State for StartClients {
    fn name(&self) -> String {
        "start clients".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let mut expected = 0;
        for (node_type, nodes) in &self.per_node_type {
            match ctx
                .resources
                .start_clients(ctx.owners, &self.server, node_type)
                .await
            {
                Ok(daemon_sets) => expected += daemon_sets * nodes,
                Err(e) => {
                    return StateOutput::error(
                        Vec::new(),
                        ValidationError::Fatal(format!("failed to start clients: {e}")),
                    )
                }
            }
        }
        info!(expected, "Started clients");
        StateOutput::next(VerifyPodsRunning {
            group: PodGroup::Clients,
            expected,
        })
    }
}

/// 5 (host check only). Start one host checker per node.
pub struct StartHostCheckers {
    public_addr: String,
    per_node_type: BTreeMap<String, u32>,
}

#[async_trait]
impl State for StartHostCheckers {
    fn name(&self) -> String {
        "start host checkers".to_string()
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        if let Err(e) = ctx
            .resources
            .start_host_checkers(ctx.owners, &self.public_addr)
            .await
        {
            return StateOutput::error(
                Vec::new(),
                ValidationError::Fatal(format!("failed to start host checkers: {e}")),
            );
        }
        let expected = self.per_node_type.values().sum();
        info!(expected, "Started host checkers");
        StateOutput::next(VerifyPodsRunning {
            group: PodGroup::HostCheckers,
            expected,
        })
    }
}

/// 6. Every pod of the group is running, even if not ready.
pub struct VerifyPodsRunning {
    group: PodGroup,
    expected: u32,
}

#[async_trait]
impl State for VerifyPodsRunning {
    fn name(&self) -> String {
        format!("verify all {} are running", self.group.noun())
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let suggestions = self.group.not_running_suggestions();
        let running = match ctx.resources.num_running_pods(&self.group.selector()).await {
            Ok(n) => n,
            Err(e) => return StateOutput::error(suggestions, e),
        };
        if running != self.expected {
            return StateOutput::error(
                suggestions,
                ValidationError::NotReady(format!(
                    "{running} of {} {} are running",
                    self.expected,
                    self.group.noun()
                )),
            );
        }
        info!(
            count = self.expected,
            group = self.group.noun(),
            "All pods are running, but may not be ready"
        );
        StateOutput::next(VerifyPodsReady::new(self.group, self.expected))
    }
}

/// 7. Every pod of the group is ready; flags a slow spread between first and last.
pub struct VerifyPodsReady {
    group: PodGroup,
    expected: u32,
    first_ready_at: Option<Instant>,
    flaky: bool,
}

impl VerifyPodsReady {
    #[must_use]
    pub fn new(group: PodGroup, expected: u32) -> Self {
        Self {
            group,
            expected,
            first_ready_at: None,
            flaky: false,
        }
    }

    fn check_if_flaky(&mut self, ctx: &StateContext<'_>, num_ready: u32) {
        if self.flaky {
            return;
        }
        let Some(first) = self.first_ready_at else {
            if num_ready > 0 {
                debug!(group = self.group.noun(), "Pods started becoming ready");
                self.first_ready_at = Some(Instant::now());
            }
            return;
        };
        let threshold = ctx.config.flaky_threshold;
        if first.elapsed() > threshold {
            warn!(
                threshold = %format_duration(threshold),
                "Network seems flaky; the time since pods started becoming ready is greater than the threshold"
            );
            self.flaky = true;
        }
    }
}

#[async_trait]
impl State for VerifyPodsReady {
    fn name(&self) -> String {
        format!("verify all {} are ready", self.group.noun())
    }

    async fn run(&mut self, ctx: &StateContext<'_>) -> StateOutput {
        let suggestions = self.group.not_ready_suggestions();
        let ready = match ctx.resources.num_ready_pods(&self.group.selector()).await {
            Ok(n) => n,
            Err(e) => return StateOutput::error(suggestions, e),
        };

        self.check_if_flaky(ctx, ready);

        if ready != self.expected {
            return StateOutput::error(
                suggestions,
                ValidationError::NotReady(format!(
                    "number of ready {} [{ready}] is not the number expected [{}]",
                    self.group.noun(),
                    self.expected
                )),
            );
        }

        info!(
            count = self.expected,
            group = self.group.noun(),
            "All pods are ready"
        );
        let mut on_success = Vec::new();
        if self.flaky {
            on_success.push(format!(
                "not all {} became ready within {}; {FLAKY_NETWORK_SUGGESTION}",
                self.group.noun(),
                format_duration(ctx.config.flaky_threshold)
            ));
        }
        StateOutput {
            suggestions: on_success,
            result: Ok(Transition::Exit),
        }
    }
}

/// Run states from `state` until one exits, fails fatally, times out or `token` is
/// cancelled.
///
/// Suggestions from the state that was running when the machine stopped are added to the
/// results; on success only the final state's suggestions are kept.
pub async fn run_state_machine(
    ctx: &StateContext<'_>,
    mut state: Box<dyn State>,
    token: &CancellationToken,
) -> (ValidationTestResults, Result<(), ValidationError>) {
    let mut results = ValidationTestResults::default();
    let timeout = ctx.config.resource_timeout;
    let mut deadline = Instant::now() + timeout;
    let mut last_error: Option<String> = None;
    let mut last_suggestions: Vec<String> = Vec::new();

    info!(state = %state.name(), "Starting validation state");
    loop {
        let name = state.name();
        let output = tokio::select! {
            biased;
            () = token.cancelled() => {
                results.add_suggestions(last_suggestions);
                return (results, Err(ValidationError::Canceled));
            }
            () = tokio::time::sleep_until(deadline) => {
                results.add_suggestions(last_suggestions);
                return (results, Err(timed_out(name, timeout, last_error)));
            }
            output = state.run(ctx) => output,
        };

        match output.result {
            Ok(Transition::Exit) => {
                results.add_suggestions(output.suggestions);
                return (results, Ok(()));
            }
            Ok(Transition::Next(next)) => {
                state = next;
                deadline = Instant::now() + timeout;
                last_error = None;
                last_suggestions = output.suggestions;
                info!(state = %state.name(), "Starting validation state");
                continue;
            }
            Ok(Transition::Stay) => last_suggestions = output.suggestions,
            Err(e) if e.is_fatal() => {
                results.add_suggestions(output.suggestions);
                return (results, Err(e));
            }
            Err(e) => {
                debug!(state = %name, error = %e, "Validation state not complete; retrying");
                last_error = Some(e.to_string());
                last_suggestions = output.suggestions;
            }
        }

        tokio::select! {
            biased;
            () = token.cancelled() => {
                results.add_suggestions(last_suggestions);
                return (results, Err(ValidationError::Canceled));
            }
            () = tokio::time::sleep(STATE_RETRY_DELAY) => {}
        }
    }
}

fn timed_out(
    state: String,
    timeout: std::time::Duration,
    last_error: Option<String>,
) -> ValidationError {
    ValidationError::Timeout {
        state,
        timeout: format_duration(timeout),
        last_error: last_error.unwrap_or_else(|| "none".to_string()),
    }
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod state_machine_tests;
