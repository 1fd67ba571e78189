// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Network namespace and link plumbing.
//!
//! Two seams keep every kernel mutation testable:
//!
//! - [`NetNsProvider`] / [`NetNs`] locate namespaces and run closures inside them
//! - [`NetExecutor`] performs link, address and route operations in whatever namespace the
//!   calling task is currently in
//!
//! Production code pairs [`LinuxNetNsProvider`] with [`RtNetlinkExecutor`]. Unit tests use
//! the in-memory doubles in `mock`.

use std::future::Future;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod executor;
pub mod netlink;
pub mod netns;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use executor::NetExecutor;
pub use netlink::RtNetlinkExecutor;
pub use netns::{LinuxNetNs, LinuxNetNsProvider};
pub use types::{Address, LinkAttrs, LinkKind, MacAddr, NetworkConfig, Route, HOST_LINK_NETNS_ID};

/// Errors raised by namespace handling and link operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// No link with the given name exists in the namespace the operation ran in.
    #[error("link {name:?} not found")]
    LinkNotFound { name: String },

    /// A link with the given name already exists.
    #[error("link {name:?} already exists")]
    LinkExists { name: String },

    /// The kernel already holds the address or route being added (`EEXIST`).
    #[error("{operation} failed: {what} already exists")]
    AlreadyExists { operation: &'static str, what: String },

    /// No namespace under the namespace directory holds an interface with the address.
    ///
    /// Per-namespace failures seen while searching are carried along for context.
    #[error("no network namespace has an interface with address {ip:?}{}", format_search_errors(.errors))]
    NamespaceNotFound { ip: String, errors: Vec<String> },

    /// The link's parent does not live in the host network namespace, so a clone created
    /// in the host namespace could not reference it.
    #[error(
        "unsupported configuration: parent interface net namespace ID {netns_id} of interface {interface:?} \
         is not the host network namespace ID {host}; the parent interface must be in the host network namespace",
        host = types::HOST_LINK_NETNS_ID
    )]
    UnsupportedParentNamespace { interface: String, netns_id: String },

    /// Only macvlan and ipvlan links can be recreated from a snapshot.
    #[error("unsupported configuration: cannot clone interface {interface:?} of type {kind:?}")]
    UnsupportedLinkKind { interface: String, kind: String },

    /// A route mixes address families or otherwise cannot be expressed to the kernel.
    #[error("invalid route {route}")]
    InvalidRoute { route: String },

    #[error("invalid hardware address {0:?}")]
    InvalidHardwareAddress(String),

    /// Opening or joining a namespace failed.
    #[error("network namespace {path:?}: {operation} failed: {source}")]
    Namespace {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The dedicated namespace thread ended without handing back a result (it panicked or
    /// could not start).
    #[error("worker for network namespace {path:?} exited without a result")]
    NamespaceWorker { path: PathBuf },

    /// A netlink request failed.
    #[error("netlink {operation} failed: {source}")]
    Netlink {
        operation: &'static str,
        #[source]
        source: rtnetlink::Error,
    },

    #[error("failed to open netlink connection: {0}")]
    Connection(#[source] std::io::Error),
}

impl NetError {
    /// Whether the error means the link does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetError::LinkNotFound { .. })
    }

    /// Whether the error means the object being added is already there.
    #[must_use]
    pub fn is_exists(&self) -> bool {
        matches!(self, NetError::LinkExists { .. } | NetError::AlreadyExists { .. })
    }
}

fn format_search_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!("; errors while searching: [{}]", errors.join("; "))
    }
}

/// A handle on one kernel network namespace.
pub trait NetNs: Send + Sync + 'static {
    /// Filesystem path of the namespace, used for logging.
    fn path(&self) -> &Path;

    /// File descriptor of the namespace, used to move links into it.
    fn fd(&self) -> RawFd;

    /// Run `f` with this namespace active.
    ///
    /// The future returned by `f` is driven to completion on an execution context that stays
    /// in this namespace for its whole lifetime; the caller's thread never changes namespace.
    /// Work spawned from inside `f` must not assume it runs in the caller's namespace.
    fn enter<F, Fut, T>(&self, f: F) -> impl Future<Output = Result<T, NetError>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, NetError>> + Send + 'static,
        T: Send + 'static;
}

/// Locates network namespaces.
pub trait NetNsProvider: Send + Sync + 'static {
    type Ns: NetNs;

    /// The namespace this process runs in (the host namespace for the mover).
    fn current_namespace(&self) -> Result<Self::Ns, NetError>;

    /// The namespace bound at `path`.
    fn namespace_by_path(&self, path: &Path) -> Result<Self::Ns, NetError>;

    /// Every namespace file in the namespace directory, sorted by path.
    fn namespace_paths(&self) -> Result<Vec<PathBuf>, NetError>;
}
