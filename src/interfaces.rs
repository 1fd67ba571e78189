// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Interface-clone engine.
//!
//! Locates a holder pod's namespace by address, snapshots its Multus interface, and
//! recreates that interface in the host namespace under a `<prefix><n>` name carrying the
//! same MAC, addresses and routes. Every operation goes through a [`NetNsProvider`] and a
//! [`NetExecutor`], so none of it touches the kernel directly.
//!
//! Clones are tied to their holder by hardware address only. Nothing here stores a
//! reference from clone to holder; callers re-discover the relation by scanning.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::net::{
    LinkAttrs, MacAddr, NetError, NetExecutor, NetNs, NetNsProvider, NetworkConfig,
    HOST_LINK_NETNS_ID,
};

/// Clone engine over a namespace provider and a link executor.
#[derive(Clone, Debug)]
pub struct InterfaceEngine<P, E> {
    provider: P,
    exec: E,
}

impl<P: NetNsProvider, E: NetExecutor> InterfaceEngine<P, E> {
    pub fn new(provider: P, exec: E) -> Self {
        Self { provider, exec }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The namespace the mover runs in.
    ///
    /// # Errors
    ///
    /// Returns an error if the current namespace file cannot be opened.
    pub fn host_namespace(&self) -> Result<P::Ns, NetError> {
        self.provider.current_namespace()
    }

    /// Find the namespace that has an interface with address `ip`.
    ///
    /// Namespaces that cannot be opened or read are skipped; their errors are reported in
    /// [`NetError::NamespaceNotFound`] if no namespace matches.
    ///
    /// # Errors
    ///
    /// Fails if the namespace directory cannot be listed or no namespace matches.
    pub async fn find_namespace_with_ip(&self, ip: &str) -> Result<P::Ns, NetError> {
        let mut errors = Vec::new();

        for path in self.provider.namespace_paths()? {
            let ns = match self.provider.namespace_by_path(&path) {
                Ok(ns) => ns,
                Err(e) => {
                    debug!(netns = %path.display(), error = %e, "skipping unopenable network namespace");
                    errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            match self.find_interface_by_address(&ns, ip).await {
                Ok(Some(iface)) => {
                    debug!(netns = %path.display(), iface = %iface, ip, "found network namespace with address");
                    return Ok(ns);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(netns = %path.display(), error = %e, "error searching network namespace; continuing search");
                    errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        Err(NetError::NamespaceNotFound {
            ip: ip.to_string(),
            errors,
        })
    }

    /// Name of the interface in `ns` that has address `ip` (exact string match), if any.
    ///
    /// # Errors
    ///
    /// Only enumeration failures are errors; "not found" is `Ok(None)`.
    pub async fn find_interface_by_address(
        &self,
        ns: &P::Ns,
        ip: &str,
    ) -> Result<Option<String>, NetError> {
        let exec = self.exec.clone();
        let ip = ip.to_string();
        ns.enter(move || async move {
            for link in exec.interfaces().await? {
                let addrs = exec.addresses(&link).await?;
                if addrs.iter().any(|a| a.ip.to_string() == ip) {
                    return Ok(Some(link.name));
                }
            }
            Ok(None)
        })
        .await
    }

    /// Name of the interface in `ns` with hardware address `mac`, if any.
    ///
    /// # Errors
    ///
    /// Only enumeration failures are errors; "not found" is `Ok(None)`.
    pub async fn find_interface_by_hardware_address(
        &self,
        ns: &P::Ns,
        mac: MacAddr,
    ) -> Result<Option<String>, NetError> {
        let exec = self.exec.clone();
        ns.enter(move || async move {
            Ok(exec
                .interfaces()
                .await?
                .into_iter()
                .find(|l| l.hardware_addr == mac)
                .map(|l| l.name))
        })
        .await
    }

    /// Snapshot of `iface` in `ns`: link attributes, addresses and routes.
    ///
    /// # Errors
    ///
    /// Fails if the link does not exist or cannot be read.
    pub async fn get_network_config(
        &self,
        ns: &P::Ns,
        iface: &str,
    ) -> Result<NetworkConfig, NetError> {
        let exec = self.exec.clone();
        let iface = iface.to_string();
        ns.enter(move || async move {
            let link = exec.link_by_name(&iface).await?;
            let addrs = exec.addresses(&link).await?;
            let routes = exec.routes(&link).await?;
            Ok(NetworkConfig {
                link,
                addrs,
                routes,
            })
        })
        .await
    }

    /// Set `iface` in `ns` administratively down.
    ///
    /// # Errors
    ///
    /// Fails if the link does not exist or cannot be changed.
    pub async fn disable_interface(&self, ns: &P::Ns, iface: &str) -> Result<(), NetError> {
        let exec = self.exec.clone();
        let iface = iface.to_string();
        ns.enter(move || async move {
            let link = exec.link_by_name(&iface).await?;
            exec.set_link_down(&link).await
        })
        .await?;
        debug!(netns = %ns.path().display(), "disabled interface");
        Ok(())
    }

    /// Recreate `holder_iface` from `holder_ns` in `host_ns` as `new_name`.
    ///
    /// The clone keeps the holder's MAC, MTU, parent and mode. The kernel assigns its index
    /// and queue length, and it is created in the host namespace itself. The holder link's
    /// parent must live in the host namespace.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnsupportedParentNamespace`] when the parent is elsewhere, or
    /// any error from reading the holder link or creating the clone.
    pub async fn clone_interface_to_host_namespace(
        &self,
        holder_ns: &P::Ns,
        host_ns: &P::Ns,
        holder_iface: &str,
        new_name: &str,
    ) -> Result<LinkAttrs, NetError> {
        let exec = self.exec.clone();
        let name = holder_iface.to_string();
        let link = holder_ns
            .enter(move || async move { exec.link_by_name(&name).await })
            .await?;

        if link.link_netns_id != Some(HOST_LINK_NETNS_ID) {
            return Err(NetError::UnsupportedParentNamespace {
                interface: link.name,
                netns_id: link
                    .link_netns_id
                    .map_or_else(|| "unset".to_string(), |id| id.to_string()),
            });
        }

        let clone = LinkAttrs {
            index: 0,
            name: new_name.to_string(),
            tx_queue_len: 0,
            link_netns_id: None,
            up: false,
            ..link
        };

        let exec = self.exec.clone();
        let to_create = clone.clone();
        host_ns
            .enter(move || async move { exec.create_link(&to_create).await })
            .await?;

        info!(
            holder_iface,
            clone = new_name,
            mac = %clone.hardware_addr,
            kind = clone.kind.name(),
            "created interface clone in host network namespace"
        );
        Ok(clone)
    }

    /// Bring `iface` in `ns` up and replay the snapshot's addresses and routes onto it.
    ///
    /// Entries that already exist, or that the kernel reports as existing when added, are
    /// left alone, so calling this again is harmless.
    /// Address labels are rewritten to `iface`.
    ///
    /// # Errors
    ///
    /// Fails on the first link, address or route operation that fails.
    pub async fn configure_interface(
        &self,
        ns: &P::Ns,
        iface: &str,
        config: &NetworkConfig,
    ) -> Result<(), NetError> {
        let exec = self.exec.clone();
        let iface = iface.to_string();
        let config = config.clone();
        ns.enter(move || async move {
            let link = exec.link_by_name(&iface).await?;
            if !link.up {
                exec.set_link_up(&link).await?;
            }

            let existing = exec.addresses(&link).await?;
            for addr in &config.addrs {
                if existing.iter().any(|e| e.same_assignment(addr)) {
                    continue;
                }
                let mut relabeled = addr.clone();
                relabeled.label = Some(iface.clone());
                match exec.add_address(&link, &relabeled).await {
                    Ok(()) => debug!(iface = %iface, addr = %relabeled, "added address"),
                    Err(e) if e.is_exists() => {
                        debug!(iface = %iface, addr = %relabeled, "address already present");
                    }
                    Err(e) => return Err(e),
                }
            }

            // The kernel adds a subnet route for each new address, which may differ from the
            // snapshot's copy only in attributes the kernel does not key routes on.
            let existing = exec.routes(&link).await?;
            for route in &config.routes {
                if existing.contains(route) {
                    continue;
                }
                match exec.add_route(&link, route).await {
                    Ok(()) => debug!(iface = %iface, route = %route, "added route"),
                    Err(e) if e.is_exists() => {
                        debug!(iface = %iface, route = %route, "route already present");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await
    }

    /// Delete `iface` from `ns`. A missing link counts as deleted.
    ///
    /// # Errors
    ///
    /// Fails if the link exists but cannot be removed.
    pub async fn delete_interface(&self, ns: &P::Ns, iface: &str) -> Result<(), NetError> {
        let exec = self.exec.clone();
        let iface = iface.to_string();
        ns.enter(move || async move {
            match exec.link_by_name(&iface).await {
                Ok(link) => exec.delete_link(&link).await,
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Lowest unused `<prefix><n>` name in the host namespace.
    ///
    /// Names with the prefix whose suffix is not a number cannot collide and are ignored.
    ///
    /// # Errors
    ///
    /// Fails if host interfaces cannot be listed.
    pub async fn determine_next_interface_name(&self, prefix: &str) -> Result<String, NetError> {
        let host = self.host_namespace()?;
        let exec = self.exec.clone();
        let links = host
            .enter(move || async move { exec.interfaces().await })
            .await?;

        let used: BTreeSet<u32> = links
            .iter()
            .filter_map(|l| l.name.strip_prefix(prefix))
            .filter_map(|suffix| suffix.parse().ok())
            .collect();
        // `used` iterates in ascending order, so the first gap is the lowest free index.
        let mut next = 0u32;
        for n in &used {
            if *n != next {
                break;
            }
            next += 1;
        }

        Ok(format!("{prefix}{next}"))
    }

    /// Delete every host interface whose name starts with `prefix`, returning the names
    /// removed. Individual failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails only if host interfaces cannot be listed.
    pub async fn cleanup_all_interfaces_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<String>, NetError> {
        let host = self.host_namespace()?;
        let exec = self.exec.clone();
        let prefix = prefix.to_string();
        host.enter(move || async move {
            let mut removed = Vec::new();
            for link in exec.interfaces().await? {
                if !link.name.starts_with(&prefix) {
                    continue;
                }
                warn!(iface = %link.name, mac = %link.hardware_addr, "cleaning up interface which still exists");
                match exec.delete_link(&link).await {
                    Ok(()) => removed.push(link.name),
                    Err(e) => {
                        error!(iface = %link.name, error = %e, "failed to clean up interface which still exists");
                    }
                }
            }
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
#[path = "interfaces_tests.rs"]
mod interfaces_tests;
