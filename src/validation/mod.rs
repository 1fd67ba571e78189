// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Multus validation test.
//!
//! The test proves that Multus networks work well enough to run a storage cluster on them
//! before anything is installed. It starts a web server attached to the configured public
//! and cluster networks, pre-pulls the test image on every node, then starts many clients
//! on every node that must all reach the server over the secondary networks.
//!
//! Anything that looks wrong along the way is collected as a suggestion and returned in
//! [`ValidationTestResults`]. All test objects are owned by a single config map, so
//! [`ValidationTest::clean_up`] only has to delete that.

pub mod config;
pub mod duration;
pub mod networks;
pub mod resources;
pub mod state_machine;
pub mod templates;

#[cfg(test)]
pub(crate) mod fake;


use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use config::{ConfigTemplate, NodeConfig, PlacementConfig, ValidationTestConfig};
pub use networks::TestNetworks;
pub use resources::{KubeTestResources, TestResources};

use crate::constants::EXIT_CODE_INVALID_CONFIG;
use duration::format_duration;
use resources::previous_test_suggestion;
use state_machine::{initial_state, run_state_machine, StateContext};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0}")]
    InvalidConfig(String),

    #[error("multus validation test was canceled")]
    Canceled,

    #[error("timed out after {timeout} waiting for state {state:?} to complete; last error: {last_error}")]
    Timeout {
        state: String,
        timeout: String,
        last_error: String,
    },

    /// A resource is not in the expected state yet
    #[error("{0}")]
    NotReady(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Fatal(String),
}

impl ValidationError {
    /// Whether the state machine must stop instead of retrying.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NotReady(_) | Self::Kube(_))
    }

    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) => EXIT_CODE_INVALID_CONFIG,
            _ => 1,
        }
    }
}

/// Suggestions gathered during a run or cleanup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationTestResults {
    suggested_debugging: Vec<String>,
}

impl ValidationTestResults {
    /// Append suggestions, skipping empty ones.
    pub fn add_suggestions<I, S>(&mut self, suggestions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_debugging.extend(
            suggestions
                .into_iter()
                .map(Into::into)
                .filter(|s| !s.is_empty()),
        );
    }

    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        &self.suggested_debugging
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suggested_debugging.is_empty()
    }

    /// Human-readable list of suggestions; empty when there are none.
    #[must_use]
    pub fn suggested_debugging_report(&self) -> String {
        if self.suggested_debugging.is_empty() {
            return String::new();
        }
        let mut out = String::from("Suggested things to investigate before installing with Multus:\n");
        for s in &self.suggested_debugging {
            out.push_str("    - ");
            out.push_str(s);
            out.push('\n');
        }
        out
    }
}

/// A validation test bound to a config and a way to reach the cluster.
pub struct ValidationTest<R> {
    config: ValidationTestConfig,
    networks: TestNetworks,
    resources: R,
}

impl<R: TestResources> ValidationTest<R> {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if the config does not validate.
    pub fn new(config: ValidationTestConfig, resources: R) -> Result<Self, ValidationError> {
        config.validate()?;
        let networks = TestNetworks::resolve(
            &config.public_network,
            &config.cluster_network,
            &config.namespace,
        )?;
        Ok(Self {
            config,
            networks,
            resources,
        })
    }

    /// A test that is only going to be cleaned up; only the namespace and the resource
    /// timeout of `config` are used.
    #[must_use]
    pub fn for_cleanup(config: ValidationTestConfig, resources: R) -> Self {
        Self {
            config,
            networks: TestNetworks::default(),
            resources,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ValidationTestConfig {
        &self.config
    }

    /// Run the test until it passes, fails, times out or `token` is cancelled.
    ///
    /// Test resources are left in place; the caller decides whether to clean up.
    pub async fn run(&self, token: &CancellationToken) -> (ValidationTestResults, Result<(), ValidationError>) {
        info!(
            namespace = %self.config.namespace,
            public_network = %self.config.public_network,
            cluster_network = %self.config.cluster_network,
            resource_timeout = %format_duration(self.config.resource_timeout),
            flaky_threshold = %format_duration(self.config.flaky_threshold),
            host_check_only = self.config.host_check_only,
            "Starting multus validation test"
        );
        for (name, node) in &self.config.node_types {
            info!(
                node_type = %name,
                osds_per_node = node.osds_per_node,
                other_daemons_per_node = node.other_daemons_per_node,
                "Node type"
            );
        }

        let mut results = ValidationTestResults::default();
        let owners = match self.resources.create_owner().await {
            Ok(owners) => owners,
            Err(e) => {
                results.add_suggestions([previous_test_suggestion()]);
                return (results, Err(e));
            }
        };
        if let Err(e) = self.resources.start_web_server(&owners).await {
            results.add_suggestions([previous_test_suggestion()]);
            return (results, Err(e));
        }
        if let Err(e) = self.resources.start_image_pullers(&owners).await {
            results.add_suggestions([previous_test_suggestion()]);
            return (results, Err(e));
        }

        let ctx = StateContext {
            resources: &self.resources,
            config: &self.config,
            networks: &self.networks,
            owners: &owners,
        };
        let (machine_results, outcome) = run_state_machine(&ctx, initial_state(), token).await;
        results.add_suggestions(machine_results.suggested_debugging);
        if let Err(e) = &outcome {
            error!(error = %e, "Multus validation test failed");
        }
        (results, outcome)
    }

    /// Delete every test resource and wait for them to be gone.
    pub async fn clean_up(&self) -> (ValidationTestResults, Result<(), ValidationError>) {
        let mut results = ValidationTestResults::default();
        let (suggestion, outcome) = self.resources.clean_up(self.config.resource_timeout).await;
        results.add_suggestions(suggestion);
        (results, outcome)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
