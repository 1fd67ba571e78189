// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Link, address and route operations.
//!
//! Every method acts on the network namespace of the task that awaits it. Callers that
//! need a particular namespace wrap the call in [`NetNs::enter`](super::NetNs::enter).

use std::os::fd::RawFd;

use async_trait::async_trait;

use super::{Address, LinkAttrs, NetError, Route};

#[async_trait]
pub trait NetExecutor: Clone + Send + Sync + 'static {
    /// All links in the namespace.
    async fn interfaces(&self) -> Result<Vec<LinkAttrs>, NetError>;

    /// The link named `name`, or [`NetError::LinkNotFound`].
    async fn link_by_name(&self, name: &str) -> Result<LinkAttrs, NetError>;

    async fn set_link_up(&self, link: &LinkAttrs) -> Result<(), NetError>;

    async fn set_link_down(&self, link: &LinkAttrs) -> Result<(), NetError>;

    /// Create a link from a descriptor. `index` and `tx_queue_len` of 0 are left to the
    /// kernel; `link_netns_id` is ignored since new links are created in the current
    /// namespace.
    async fn create_link(&self, link: &LinkAttrs) -> Result<(), NetError>;

    async fn delete_link(&self, link: &LinkAttrs) -> Result<(), NetError>;

    /// Move a link into the namespace referred to by `ns_fd`.
    async fn move_link_to_namespace(&self, link: &LinkAttrs, ns_fd: RawFd)
        -> Result<(), NetError>;

    /// Addresses assigned to `link`.
    async fn addresses(&self, link: &LinkAttrs) -> Result<Vec<Address>, NetError>;

    async fn add_address(&self, link: &LinkAttrs, addr: &Address) -> Result<(), NetError>;

    /// Routes whose output interface is `link`, from every table.
    async fn routes(&self, link: &LinkAttrs) -> Result<Vec<Route>, NetError>;

    async fn add_route(&self, link: &LinkAttrs, route: &Route) -> Result<(), NetError>;
}
