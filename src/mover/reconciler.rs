// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Holder pod reconciliation.
//!
//! For a live holder pod the reconciler makes sure a clone of its Multus interface exists
//! in the host namespace and is configured. For a deleted or terminating holder it removes
//! the clone it recorded. All interface changes happen with the network mutex held.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::cache::{MovedInterfaceCache, MovedInterfaceInfo};
use super::holder::{holder_network, holder_pod_ip, is_terminating};
use super::MoverError;
use crate::interfaces::InterfaceEngine;
use crate::net::{NetExecutor, NetNs, NetNsProvider};

/// Reconciles holder pods against host namespace interfaces.
pub struct HolderReconciler<P, E> {
    engine: InterfaceEngine<P, E>,
    cache: Arc<Mutex<MovedInterfaceCache>>,
    token: CancellationToken,
    prefix: String,
}

impl<P: NetNsProvider, E: NetExecutor> HolderReconciler<P, E> {
    pub fn new(
        engine: InterfaceEngine<P, E>,
        cache: Arc<Mutex<MovedInterfaceCache>>,
        token: CancellationToken,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            cache,
            token,
            prefix: prefix.into(),
        }
    }

    pub fn engine(&self) -> &InterfaceEngine<P, E> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<Mutex<MovedInterfaceCache>> {
        &self.cache
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reconcile the holder pod `name`. `pod` is `None` when the pod no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`MoverError::NotReady`] while the pod has no IP or network status yet, and
    /// any other error from cloning or cleaning up.
    pub async fn reconcile(&self, name: &str, pod: Option<&Pod>) -> Result<(), MoverError> {
        if self.token.is_cancelled() {
            info!(pod = %name, "not reconciling holder pod since reconciliation is canceled");
            return Ok(());
        }

        match pod {
            None => {
                info!(pod = %name, "holder pod was deleted; ensuring its interface is cleaned up");
                self.clean_up(name).await
            }
            Some(pod) if is_terminating(pod) => {
                info!(pod = %name, "holder pod is marked for deletion; ensuring its interface is cleaned up");
                self.clean_up(name).await
            }
            Some(pod) => {
                info!(pod = %name, "ensuring interface for holder pod is moved to the host network namespace");
                self.ensure_clone(pod).await
            }
        }
    }

    /// Wait for the network mutex, giving up if the mover is shutting down.
    async fn lock_unless_cancelled(&self) -> Option<MutexGuard<'_, MovedInterfaceCache>> {
        let guard = tokio::select! {
            guard = self.cache.lock() => guard,
            () = self.token.cancelled() => return None,
        };
        if self.token.is_cancelled() {
            return None;
        }
        Some(guard)
    }

    /// Make sure the holder's Multus interface has a configured clone in the host namespace.
    ///
    /// Safe to repeat: an existing clone (found by MAC) is reconfigured instead of recreated.
    ///
    /// # Errors
    ///
    /// See [`reconcile`](Self::reconcile).
    pub async fn ensure_clone(&self, pod: &Pod) -> Result<(), MoverError> {
        let pod_name = pod.name_any();

        let ip = holder_pod_ip(pod).ok_or_else(|| MoverError::NotReady {
            pod: pod_name.clone(),
            reason: "pod has no IP address yet".to_string(),
        })?;
        let holder_iface = holder_network(pod)
            .map_err(|e| MoverError::NotReady {
                pod: pod_name.clone(),
                reason: e.to_string(),
            })?
            .interface;

        let Some(mut cache) = self.lock_unless_cancelled().await else {
            info!(pod = %pod_name, "abandoning reconciliation for holder pod after waiting for network lock");
            return Ok(());
        };

        let known = format!("holder pod {pod_name:?}, ip {ip:?}");
        let holder_ns = self
            .engine
            .find_namespace_with_ip(&ip)
            .await
            .map_err(|e| MoverError::net(format!("failed to determine network namespace of holder pod: {known}"), e))?;
        info!(pod = %pod_name, netns = %holder_ns.path().display(), "found network namespace of holder pod");

        let known = format!(
            "holder pod {pod_name:?}, ip {ip:?}, net namespace {:?}, multus interface {holder_iface:?}",
            holder_ns.path().display().to_string()
        );
        let config = self
            .engine
            .get_network_config(&holder_ns, &holder_iface)
            .await
            .map_err(|e| MoverError::net(format!("failed to get network config of multus interface: {known}"), e))?;
        if config.addrs.is_empty() {
            return Err(MoverError::NoAddresses { context: known });
        }
        let mac = config.link.hardware_addr;
        let known = format!("{known}, mac {:?}", mac.to_string());
        info!(
            pod = %pod_name,
            mac = %mac,
            addrs = ?config.addrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
            routes = ?config.routes.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "found network address and route info for multus interface"
        );

        let host_ns = self
            .engine
            .host_namespace()
            .map_err(|e| MoverError::net("failed to determine host network namespace", e))?;

        let existing = self
            .engine
            .find_interface_by_hardware_address(&host_ns, mac)
            .await
            .map_err(|e| {
                MoverError::net(
                    format!("failed to determine (by MAC address) if the multus interface was already moved to the host net namespace: {known}"),
                    e,
                )
            })?;
        if let Some(existing) = &existing {
            if !existing.starts_with(&self.prefix) {
                return Err(MoverError::ConflictingInterface {
                    existing: existing.clone(),
                    context: known,
                });
            }
        }

        let (moved, fresh) = if let Some(existing) = existing {
            info!(pod = %pod_name, iface = %existing, "interface was already moved to the host network namespace; still ensuring it is configured");
            (existing, false)
        } else {
            let new_name = self
                .engine
                .determine_next_interface_name(&self.prefix)
                .await
                .map_err(|e| {
                    MoverError::net(
                        format!("failed to determine an available interface with prefix {:?} in host net namespace", self.prefix),
                        e,
                    )
                })?;
            self.engine
                .disable_interface(&holder_ns, &holder_iface)
                .await
                .map_err(|e| MoverError::net(format!("failed to disable multus interface: {known}"), e))?;
            self.engine
                .clone_interface_to_host_namespace(&holder_ns, &host_ns, &holder_iface, &new_name)
                .await
                .map_err(|e| MoverError::net(format!("failed to copy interface to host net namespace: {known}"), e))?;
            (new_name, true)
        };

        let configured = AssertUnwindSafe(self.engine.configure_interface(&host_ns, &moved, &config))
            .catch_unwind()
            .await;
        let failure = match configured {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(MoverError::net(
                format!("failed to (re)configure moved interface {moved:?}: {known}"),
                e,
            )),
            Err(panic) => Some(MoverError::ConfigurePanic {
                iface: moved.clone(),
                message: panic_message(panic.as_ref()),
                context: known.clone(),
            }),
        };
        if let Some(err) = failure {
            if fresh {
                if let Err(e) = self.engine.delete_interface(&host_ns, &moved).await {
                    error!(iface = %moved, error = %e, "failed to delete moved interface copy");
                }
            }
            return Err(err);
        }

        cache.add(
            &pod_name,
            MovedInterfaceInfo {
                cloned_interface_name: moved.clone(),
            },
        );
        info!(pod = %pod_name, iface = %moved, mac = %mac, "successfully moved holder interface to host network namespace");
        Ok(())
    }

    /// Delete the clone recorded for `holder_pod`, if any.
    ///
    /// Runs even when the mover is shutting down, since the clone has to go either way.
    ///
    /// # Errors
    ///
    /// Fails if the clone exists but cannot be deleted; the cache entry is kept then.
    pub async fn clean_up(&self, holder_pod: &str) -> Result<(), MoverError> {
        let mut cache = self.cache.lock().await;
        clean_up_moved_interface(&self.engine, &mut cache, holder_pod).await
    }
}

/// Delete the clone recorded for `holder_pod` and forget it. The caller holds the mutex.
///
/// # Errors
///
/// Fails if the host namespace cannot be opened or the clone cannot be deleted.
pub async fn clean_up_moved_interface<P: NetNsProvider, E: NetExecutor>(
    engine: &InterfaceEngine<P, E>,
    cache: &mut MovedInterfaceCache,
    holder_pod: &str,
) -> Result<(), MoverError> {
    let Some(info) = cache.get(holder_pod).cloned() else {
        return Ok(());
    };

    let host_ns = engine
        .host_namespace()
        .map_err(|e| MoverError::net("failed to determine host network namespace", e))?;
    engine
        .delete_interface(&host_ns, &info.cloned_interface_name)
        .await
        .map_err(|e| {
            MoverError::net(
                format!(
                    "failed to delete moved interface {:?} for holder pod {holder_pod:?}",
                    info.cloned_interface_name
                ),
                e,
            )
        })?;
    cache.remove(holder_pod);

    info!(pod = %holder_pod, iface = %info.cloned_interface_name, "successfully cleaned up moved interface");
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
