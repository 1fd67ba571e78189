// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line surface of the `multus` binary.
//!
//! ```text
//! multus mover
//! multus validation run [--public-network NAD] [--cluster-network NAD] [...]
//! multus validation run --config FILE [--host-check-only]
//! multus validation cleanup [-n NS] [--timeout-minutes M]
//! multus validation config {converged|dedicated-storage-nodes|stretch-cluster}
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::constants::{
    DEFAULT_NGINX_IMAGE, DEFAULT_OSDS_PER_NODE, DEFAULT_RESOURCE_TIMEOUT,
    DEFAULT_VALIDATION_NAMESPACE, ENV_POD_NAMESPACE,
};
use crate::validation::{ConfigTemplate, ValidationError, ValidationTestConfig, ValidationTestResults};

const VALIDATION_RUN_ABOUT: &str = "\
Run a validation test that determines whether the current Multus and system
configurations will support a storage cluster with Multus.

This is a fairly long-running test. It starts up a web server and many
clients to verify that Multus network communication works properly.

It does *not* perform any load testing. Networks that cannot support high
volumes of storage traffic may still encounter runtime issues, particularly
under high I/O load or while data is rebalancing.";

/// Artifacts users should gather when asking for help with a failed test.
pub const DEBUG_ARTIFACTS_CHECKLIST: &str = "\
For assistance debugging, collect the following into an archive file:
  - Output of this utility
  - Network Attachment Definitions (NADs) used by this test
  - A write-up describing the network configuration you are trying to achieve including the
      intended network for public/client traffic, intended network for cluster traffic,
      interface names and CIDRs for both networks, and any other details that are relevant.
  - 'ifconfig' output from at least one Kubernetes worker node
  - 'kubectl get pods -o wide' output from the test namespace
  - 'kubectl describe pods' output from the test namespace
  - 'kubectl get pods -o yaml' output from the test namespace
  - 'kubectl get daemonsets' output from the test namespace
  - 'kubectl describe daemonsets' output from the test namespace
  - 'kubectl get daemonsets -o yaml' output from the test namespace
  - 'kubectl logs multus-validation-test-web-server' output from the test namespace
  - 'kubectl get nodes -o wide' output
";

#[derive(Debug, Parser)]
#[command(name = "multus", version, about = "Multus network tools for storage clusters")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Clone holder pod Multus interfaces into the host network namespace
    Mover,

    /// Run and manage Multus validation tests
    Validation {
        #[command(subcommand)]
        command: ValidationCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ValidationCommand {
    /// Run a Multus validation test
    #[command(long_about = VALIDATION_RUN_ABOUT)]
    Run(RunArgs),

    /// Clean up Multus validation test resources
    Cleanup(CleanupArgs),

    /// Print a validation test config template
    Config {
        #[arg(value_enum)]
        template: ConfigTemplate,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Namespace for validation test resources; use the namespace the storage cluster will
    /// be installed in
    #[arg(short, long, env = ENV_POD_NAMESPACE, default_value = DEFAULT_VALIDATION_NAMESPACE)]
    pub namespace: String,

    /// Network Attachment Definition for the public network, as <namespace>/<name> if it
    /// lives outside the test namespace
    #[arg(long)]
    pub public_network: Option<String>,

    /// Network Attachment Definition for the cluster network, as <namespace>/<name> if it
    /// lives outside the test namespace
    #[arg(long)]
    pub cluster_network: Option<String>,

    /// Validation test daemons per node; the worst-case number of storage daemons any node
    /// may run after node failures
    #[arg(long)]
    pub daemons_per_node: Option<u32>,

    /// Image for the web server and clients
    #[arg(long)]
    pub nginx_image: Option<String>,

    /// Service account for test pods
    #[arg(long)]
    pub service_account: Option<String>,

    /// Only check host connectivity to the public network
    #[arg(long)]
    pub host_check_only: bool,

    /// Seconds after the first client is ready by which all clients must be ready, or the
    /// network is reported as flaky
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub flaky_threshold_seconds: Option<u64>,

    /// Minutes to wait for resources to reach the expected state; 2 or more recommended
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_minutes: Option<u64>,

    /// YAML config file; supersedes every other flag except --host-check-only
    #[arg(
        short,
        long,
        conflicts_with_all = [
            "public_network",
            "cluster_network",
            "daemons_per_node",
            "nginx_image",
            "service_account",
            "flaky_threshold_seconds",
            "timeout_minutes",
        ]
    )]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// Build the test config from the config file or the individual flags.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if the config file cannot be read or parsed.
    pub fn to_config(&self) -> Result<ValidationTestConfig, ValidationError> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|e| {
                    ValidationError::InvalidConfig(format!(
                        "failed to read config file {}: {e}",
                        path.display()
                    ))
                })?;
                ValidationTestConfig::from_yaml(&yaml)?
            }
            None => self.config_from_flags(),
        };
        if self.host_check_only {
            config.host_check_only = true;
        }
        Ok(config)
    }

    fn config_from_flags(&self) -> ValidationTestConfig {
        let mut config = ValidationTestConfig {
            namespace: self.namespace.clone(),
            public_network: self.public_network.clone().unwrap_or_default(),
            cluster_network: self.cluster_network.clone().unwrap_or_default(),
            nginx_image: self
                .nginx_image
                .clone()
                .unwrap_or_else(|| DEFAULT_NGINX_IMAGE.to_string()),
            service_account_name: self.service_account.clone().unwrap_or_default(),
            ..ValidationTestConfig::converged()
        };
        if let Some(seconds) = self.flaky_threshold_seconds {
            config.flaky_threshold = Duration::from_secs(seconds);
        }
        if let Some(minutes) = self.timeout_minutes {
            config.resource_timeout = Duration::from_secs(minutes * 60);
        }
        if let Some(daemons) = self.daemons_per_node {
            let osds = daemons.min(DEFAULT_OSDS_PER_NODE);
            for node in config.node_types.values_mut() {
                node.osds_per_node = osds;
                node.other_daemons_per_node = daemons - osds;
            }
        }
        config
    }
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Namespace holding the validation test resources
    #[arg(short, long, env = ENV_POD_NAMESPACE, default_value = DEFAULT_VALIDATION_NAMESPACE)]
    pub namespace: String,

    /// Minutes to wait for test resources to be deleted
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_minutes: Option<u64>,
}

impl CleanupArgs {
    #[must_use]
    pub fn to_config(&self) -> ValidationTestConfig {
        ValidationTestConfig {
            namespace: self.namespace.clone(),
            resource_timeout: self
                .timeout_minutes
                .map_or(DEFAULT_RESOURCE_TIMEOUT, |m| Duration::from_secs(m * 60)),
            ..ValidationTestConfig::default()
        }
    }
}

/// What to print and do once `validation run` has finished.
#[derive(Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub output: String,
    /// Whether test resources should be deleted
    pub clean_up: bool,
    pub exit_code: i32,
}

impl RunSummary {
    /// A passing run with suggestions still deletes its resources and exits 0; only failed
    /// runs leave resources behind for debugging.
    #[must_use]
    pub fn new(results: &ValidationTestResults, outcome: &Result<(), ValidationError>) -> Self {
        let report = results.suggested_debugging_report();
        let mut output = String::from("\n");
        match outcome {
            Ok(()) if report.is_empty() => {
                output.push_str("RESULT: multus validation test succeeded!\n");
                return Self {
                    output,
                    clean_up: true,
                    exit_code: 0,
                };
            }
            Ok(()) => {
                output.push_str("RESULT: multus validation test succeeded, but there are suggestions\n\n");
                output.push_str(&report);
                output.push('\n');
                output.push_str(DEBUG_ARTIFACTS_CHECKLIST);
                return Self {
                    output,
                    clean_up: true,
                    exit_code: 0,
                };
            }
            Err(e) => {
                output.push_str(&format!("RESULT: multus validation test failed: {e}\n\n"));
            }
        }

        output.push_str(&report);
        output.push('\n');
        output.push_str("leaving multus validation test resources running for manual debugging\n\n");
        output.push_str(DEBUG_ARTIFACTS_CHECKLIST);
        output.push_str(
            "\nTo clean up resources when you are done debugging: multus validation cleanup\n",
        );
        Self {
            output,
            clean_up: false,
            exit_code: outcome.as_ref().err().map_or(1, ValidationError::exit_code),
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod cli_tests;
