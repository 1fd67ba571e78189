// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Multus interface mover.
//!
//! The mover runs on every node with host networking. It watches the holder pods on its
//! node and clones each holder's Multus interface into the host network namespace as
//! `rookm<N>`, so host processes (the CSI plugins) can reach the Multus network. When a
//! holder goes away its clone is deleted. On exit, including after a controller panic,
//! every clone is deleted.
//!
//! # Modules
//!
//! - [`cache`] - Holder pod to clone record
//! - [`holder`] - Holder pod helpers
//! - [`reconciler`] - Per-pod clone/cleanup logic
//! - [`controller`] - Kubernetes controller wiring

pub mod cache;
pub mod controller;
pub mod holder;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod fixtures;

use std::path::PathBuf;
use std::sync::Arc;

use kube::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::constants::{
    DEFAULT_NETNS_DIR, ENV_NETNS_DIR, ENV_NODE_NAME, ENV_POD_NAMESPACE, MOVED_INTERFACE_PREFIX,
    MOVER_CONTROLLER_NAME,
};
use crate::interfaces::InterfaceEngine;
use crate::net::{LinuxNetNsProvider, NetError, NetExecutor, NetNsProvider, RtNetlinkExecutor};
use crate::rate_limiter::ItemExponentialFailureRateLimiter;

pub use cache::{MovedInterfaceCache, MovedInterfaceInfo};
pub use controller::MoverContext;
pub use reconciler::HolderReconciler;

/// Errors from reconciling holder pods or running the mover.
#[derive(Debug, Error)]
pub enum MoverError {
    /// The holder is still being wired up; retried after a short fixed delay.
    #[error("holder pod {pod:?} is not ready: {reason}")]
    NotReady { pod: String, reason: String },

    #[error("{context}: {source}")]
    Net {
        context: String,
        #[source]
        source: NetError,
    },

    #[error("failed to find addresses for interface: {context}")]
    NoAddresses { context: String },

    #[error(
        "failure: unsupported scenario. this is not a macvlan setup. existing interface {existing:?} \
         with the same MAC address as the holder interface exists on the host, but it is not a moved \
         interface: {context}"
    )]
    ConflictingInterface { existing: String, context: String },

    #[error("panic while configuring moved interface {iface:?}: {message}: {context}")]
    ConfigurePanic {
        iface: String,
        message: String,
        context: String,
    },

    #[error("environment variable {0} must be set")]
    MissingEnv(&'static str),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("{MOVER_CONTROLLER_NAME} controller task failed: {0}")]
    ControllerTask(String),
}

impl MoverError {
    pub(crate) fn net(context: impl Into<String>, source: NetError) -> Self {
        Self::Net {
            context: context.into(),
            source,
        }
    }
}

/// Mover settings, read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoverConfig {
    pub node_name: String,
    pub namespace: String,
    pub netns_dir: PathBuf,
}

impl MoverConfig {
    /// Read `NODE_NAME`, `POD_NAMESPACE` and the optional `MULTUS_NETNS_DIR`.
    ///
    /// # Errors
    ///
    /// Fails if a required variable is unset or empty.
    pub fn from_env() -> Result<Self, MoverError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Fails if a required variable is unset or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MoverError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(MoverError::MissingEnv(key))
        };
        Ok(Self {
            node_name: required(ENV_NODE_NAME)?,
            namespace: required(ENV_POD_NAMESPACE)?,
            netns_dir: lookup(ENV_NETNS_DIR)
                .filter(|v| !v.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_NETNS_DIR), PathBuf::from),
        })
    }
}

/// The mover process.
pub struct Mover {
    config: MoverConfig,
}

impl Mover {
    #[must_use]
    pub fn new(config: MoverConfig) -> Self {
        Self { config }
    }

    /// Run until `token` is canceled, then remove every clone.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller task fails or panics. Clones are removed in that
    /// case too.
    pub async fn run(self, client: Client, token: CancellationToken) -> Result<(), MoverError> {
        let engine = InterfaceEngine::new(
            LinuxNetNsProvider::new(self.config.netns_dir.clone()),
            RtNetlinkExecutor,
        );
        let cache = Arc::new(Mutex::new(MovedInterfaceCache::new()));
        let reconciler =
            HolderReconciler::new(engine, cache, token.child_token(), MOVED_INTERFACE_PREFIX);

        startup_sweep(reconciler.engine()).await;

        let ctx = Arc::new(MoverContext {
            reconciler,
            rate_limiter: ItemExponentialFailureRateLimiter::default(),
            node_name: self.config.node_name.clone(),
        });

        let namespace = self.config.namespace.clone();
        let controller_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            controller::run_controller(client, &namespace, controller_ctx).await
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "holder pod controller task ended abnormally");
                Err(MoverError::ControllerTask(e.to_string()))
            }
        };

        terminate(&ctx.reconciler).await;
        result
    }
}

/// Delete clones left behind by a previous mover that died without cleaning up.
pub async fn startup_sweep<P: NetNsProvider, E: NetExecutor>(engine: &InterfaceEngine<P, E>) {
    info!(prefix = MOVED_INTERFACE_PREFIX, "removing stale multus interfaces from host network namespace");
    if let Err(e) = engine
        .cleanup_all_interfaces_with_prefix(MOVED_INTERFACE_PREFIX)
        .await
    {
        error!(error = %e, "failed to list interfaces in host net namespace during cleanup");
    }
}

/// Stop reconciling and remove every clone.
///
/// Taking the mutex waits out any reconcile in progress; since the token is canceled first,
/// no reconcile will create a clone afterwards.
pub async fn terminate<P: NetNsProvider, E: NetExecutor>(reconciler: &HolderReconciler<P, E>) {
    info!("removing multus interfaces from host network namespace before terminating mover process");
    reconciler.token().cancel();

    let mut cache = reconciler.cache().lock().await;
    for (holder_pod, info) in cache.as_map() {
        info!(pod = %holder_pod, iface = %info.cloned_interface_name, "un-moving interface for holder pod");
        if let Err(e) =
            reconciler::clean_up_moved_interface(reconciler.engine(), &mut cache, &holder_pod).await
        {
            warn!(
                pod = %holder_pod,
                iface = %info.cloned_interface_name,
                error = %e,
                "failed to clean up interface during termination; continuing despite failure"
            );
        }
    }

    if let Err(e) = reconciler
        .engine()
        .cleanup_all_interfaces_with_prefix(MOVED_INTERFACE_PREFIX)
        .await
    {
        error!(error = %e, "failed to list interfaces in host net namespace during cleanup");
    }
}
