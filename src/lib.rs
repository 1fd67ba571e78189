// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Multus - network tools for storage clusters on Kubernetes
//!
//! Two tools for running a storage cluster on Multus secondary networks.
//!
//! ## Overview
//!
//! - The **mover** runs on every node with host networking. It watches "holder" pods, whose
//!   only job is to hold a Multus interface, and clones each holder's interface into the host
//!   network namespace so host processes such as CSI plugins can reach the Multus network.
//! - The **validation test** proves, before anything is installed, that pods on every node
//!   can reach a web server over the configured public and cluster networks, and reports
//!   suggestions for anything that looks wrong.
//!
//! ## Modules
//!
//! - [`net`] - Network namespace entry and netlink operations
//! - [`interfaces`] - Interface snapshot, clone, configure and cleanup engine
//! - [`network_status`] - Multus network-status annotation parsing
//! - [`rate_limiter`] - Per-item exponential backoff for reconcile errors
//! - [`mover`] - Holder pod controller and mover process
//! - [`validation`] - Validation test config, resources and state machine
//! - [`cli`] - Command line surface of the `multus` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use multus::validation::{ConfigTemplate, ValidationTestConfig};
//!
//! let mut config: ValidationTestConfig = ConfigTemplate::DedicatedStorageNodes.config();
//! config.public_network = "rook-ceph/public-net".to_string();
//! config.validate().unwrap();
//! println!("{}", config.to_yaml().unwrap());
//! ```

pub mod cli;
pub mod constants;
pub mod interfaces;
pub mod labels;
pub mod mover;
pub mod net;
pub mod network_status;
pub mod rate_limiter;
pub mod validation;
