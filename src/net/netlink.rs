// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`NetExecutor`] backed by rtnetlink.
//!
//! A netlink socket is bound to the namespace of the thread that creates it, so every
//! operation opens its own connection in the calling thread's namespace instead of
//! sharing one long-lived handle.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::RawFd;

use async_trait::async_trait;
use futures::TryStreamExt;
use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage, AddressScope};
use rtnetlink::packet_route::link::{
    InfoData, InfoIpVlan, InfoKind, InfoMacVlan, IpVlanMode, LinkAttribute, LinkFlags, LinkInfo,
    LinkMessage, MacVlanMode,
};
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteScope};
use rtnetlink::{Handle, LinkUnspec, RouteMessageBuilder};
use tracing::{debug, trace};

use super::{Address, LinkAttrs, LinkKind, MacAddr, NetError, NetExecutor, Route};
use crate::constants::{LOCAL_ROUTE_TABLE, MACVLAN_MODE_BRIDGE};

/// Talks to the kernel of whatever namespace the awaiting thread is in.
#[derive(Clone, Copy, Debug, Default)]
pub struct RtNetlinkExecutor;

impl RtNetlinkExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn connect() -> Result<Handle, NetError> {
    let (connection, handle, _) = rtnetlink::new_connection().map_err(NetError::Connection)?;
    tokio::spawn(connection);
    Ok(handle)
}

fn netlink_err(operation: &'static str) -> impl FnOnce(rtnetlink::Error) -> NetError {
    move |source| NetError::Netlink { operation, source }
}

/// Like [`netlink_err`], but `EEXIST` becomes [`NetError::AlreadyExists`].
fn netlink_add_err(
    operation: &'static str,
    what: impl ToString,
) -> impl FnOnce(rtnetlink::Error) -> NetError {
    move |source| match &source {
        rtnetlink::Error::NetlinkError(msg)
            if msg.to_io().kind() == std::io::ErrorKind::AlreadyExists =>
        {
            NetError::AlreadyExists {
                operation,
                what: what.to_string(),
            }
        }
        _ => NetError::Netlink { operation, source },
    }
}

#[async_trait]
impl NetExecutor for RtNetlinkExecutor {
    async fn interfaces(&self) -> Result<Vec<LinkAttrs>, NetError> {
        let handle = connect()?;
        let mut links = handle.link().get().execute();
        let mut out = Vec::new();
        while let Some(msg) = links.try_next().await.map_err(netlink_err("link dump"))? {
            out.push(link_from_message(&msg));
        }
        trace!(count = out.len(), "listed links");
        Ok(out)
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkAttrs, NetError> {
        // Filtering client-side avoids depending on the kernel's ENODEV reply shape.
        self.interfaces()
            .await?
            .into_iter()
            .find(|l| l.name == name)
            .ok_or_else(|| NetError::LinkNotFound {
                name: name.to_string(),
            })
    }

    async fn set_link_up(&self, link: &LinkAttrs) -> Result<(), NetError> {
        connect()?
            .link()
            .set(LinkUnspec::new_with_index(link.index).up().build())
            .execute()
            .await
            .map_err(netlink_err("link set up"))
    }

    async fn set_link_down(&self, link: &LinkAttrs) -> Result<(), NetError> {
        connect()?
            .link()
            .set(LinkUnspec::new_with_index(link.index).down().build())
            .execute()
            .await
            .map_err(netlink_err("link set down"))
    }

    async fn create_link(&self, link: &LinkAttrs) -> Result<(), NetError> {
        let msg = link_to_message(link)?;
        debug!(name = %link.name, kind = link.kind.name(), mac = %link.hardware_addr, "creating link");
        connect()?
            .link()
            .add(msg)
            .execute()
            .await
            .map_err(netlink_err("link add"))
    }

    async fn delete_link(&self, link: &LinkAttrs) -> Result<(), NetError> {
        connect()?
            .link()
            .del(link.index)
            .execute()
            .await
            .map_err(netlink_err("link delete"))
    }

    async fn move_link_to_namespace(
        &self,
        link: &LinkAttrs,
        ns_fd: RawFd,
    ) -> Result<(), NetError> {
        connect()?
            .link()
            .set(
                LinkUnspec::new_with_index(link.index)
                    .setns_by_fd(ns_fd)
                    .build(),
            )
            .execute()
            .await
            .map_err(netlink_err("link set netns"))
    }

    async fn addresses(&self, link: &LinkAttrs) -> Result<Vec<Address>, NetError> {
        let handle = connect()?;
        let mut stream = handle
            .address()
            .get()
            .set_link_index_filter(link.index)
            .execute();
        let mut out = Vec::new();
        while let Some(msg) = stream.try_next().await.map_err(netlink_err("address dump"))? {
            // The dump filter is best-effort on older kernels.
            if msg.header.index != link.index {
                continue;
            }
            if let Some(addr) = address_from_message(&msg) {
                out.push(addr);
            }
        }
        Ok(out)
    }

    async fn add_address(&self, link: &LinkAttrs, addr: &Address) -> Result<(), NetError> {
        let handle = connect()?;
        let mut request = handle.address().add(link.index, addr.ip, addr.prefix_len);
        let msg = request.message_mut();
        msg.header.scope = AddressScope::from(addr.scope);
        // IFA_LABEL only exists for IPv4.
        if let (Some(label), IpAddr::V4(_)) = (&addr.label, addr.ip) {
            msg.attributes.push(AddressAttribute::Label(label.clone()));
        }
        request
            .execute()
            .await
            .map_err(netlink_add_err("address add", addr))
    }

    async fn routes(&self, link: &LinkAttrs) -> Result<Vec<Route>, NetError> {
        let handle = connect()?;
        let mut out = Vec::new();
        let queries = [
            RouteMessageBuilder::<Ipv4Addr>::default().build(),
            RouteMessageBuilder::<Ipv6Addr>::default().build(),
        ];
        for query in queries {
            let mut stream = handle.route().get(query).execute();
            while let Some(msg) = stream.try_next().await.map_err(netlink_err("route dump"))? {
                if let Some(route) = route_from_message(&msg, link.index) {
                    out.push(route);
                }
            }
        }
        Ok(out)
    }

    async fn add_route(&self, link: &LinkAttrs, route: &Route) -> Result<(), NetError> {
        let msg = route_to_message(link.index, route)?;
        connect()?
            .route()
            .add(msg)
            .execute()
            .await
            .map_err(netlink_add_err("route add", route))
    }
}

fn link_from_message(msg: &LinkMessage) -> LinkAttrs {
    let mut link = LinkAttrs {
        index: msg.header.index,
        up: msg.header.flags.contains(LinkFlags::Up),
        ..LinkAttrs::default()
    };
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(name) => link.name = name.clone(),
            LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
            LinkAttribute::Address(bytes) => {
                if let Some(mac) = MacAddr::from_bytes(bytes) {
                    link.hardware_addr = mac;
                }
            }
            LinkAttribute::Link(parent) => link.parent_index = Some(*parent),
            LinkAttribute::LinkNetNsId(id) => link.link_netns_id = Some(*id),
            LinkAttribute::TxQueueLen(len) => link.tx_queue_len = *len,
            LinkAttribute::LinkInfo(infos) => link.kind = kind_from_info(infos),
            _ => {}
        }
    }
    link
}

fn kind_from_info(infos: &[LinkInfo]) -> LinkKind {
    let kind = infos.iter().find_map(|i| match i {
        LinkInfo::Kind(k) => Some(k),
        _ => None,
    });
    let data = infos.iter().find_map(|i| match i {
        LinkInfo::Data(d) => Some(d),
        _ => None,
    });

    match kind {
        Some(InfoKind::MacVlan) => {
            let mode = match data {
                Some(InfoData::MacVlan(attrs)) => attrs.iter().find_map(|a| match a {
                    InfoMacVlan::Mode(m) => Some(u32::from(*m)),
                    _ => None,
                }),
                _ => None,
            };
            LinkKind::Macvlan {
                mode: mode.unwrap_or(MACVLAN_MODE_BRIDGE),
            }
        }
        Some(InfoKind::IpVlan) => {
            let mode = match data {
                Some(InfoData::IpVlan(attrs)) => attrs.iter().find_map(|a| match a {
                    InfoIpVlan::Mode(m) => Some(u16::from(*m)),
                    _ => None,
                }),
                _ => None,
            };
            LinkKind::Ipvlan {
                mode: mode.unwrap_or_default(),
            }
        }
        Some(other) => LinkKind::Other(other.to_string()),
        None => LinkKind::default(),
    }
}

fn link_to_message(link: &LinkAttrs) -> Result<LinkMessage, NetError> {
    let unsupported = || NetError::UnsupportedLinkKind {
        interface: link.name.clone(),
        kind: link.kind.name().to_string(),
    };

    let info = match &link.kind {
        LinkKind::Macvlan { mode } => vec![
            LinkInfo::Kind(InfoKind::MacVlan),
            LinkInfo::Data(InfoData::MacVlan(vec![InfoMacVlan::Mode(
                MacVlanMode::from(*mode),
            )])),
        ],
        LinkKind::Ipvlan { mode } => vec![
            LinkInfo::Kind(InfoKind::IpVlan),
            LinkInfo::Data(InfoData::IpVlan(vec![InfoIpVlan::Mode(IpVlanMode::from(
                *mode,
            ))])),
        ],
        LinkKind::Other(_) => return Err(unsupported()),
    };
    let parent = link.parent_index.ok_or_else(unsupported)?;

    let mut msg = LinkMessage::default();
    msg.attributes.push(LinkAttribute::IfName(link.name.clone()));
    msg.attributes.push(LinkAttribute::Link(parent));
    msg.attributes
        .push(LinkAttribute::Address(link.hardware_addr.octets().to_vec()));
    if link.mtu > 0 {
        msg.attributes.push(LinkAttribute::Mtu(link.mtu));
    }
    if link.tx_queue_len > 0 {
        msg.attributes.push(LinkAttribute::TxQueueLen(link.tx_queue_len));
    }
    msg.attributes.push(LinkAttribute::LinkInfo(info));
    Ok(msg)
}

fn address_from_message(msg: &AddressMessage) -> Option<Address> {
    let mut local = None;
    let mut address = None;
    let mut label = None;
    let mut broadcast = None;
    for attr in &msg.attributes {
        match attr {
            AddressAttribute::Local(ip) => local = Some(*ip),
            AddressAttribute::Address(ip) => address = Some(*ip),
            AddressAttribute::Label(l) => label = Some(l.clone()),
            AddressAttribute::Broadcast(b) => broadcast = Some(*b),
            _ => {}
        }
    }
    // IFA_LOCAL is the interface's own address; IFA_ADDRESS is the peer on point-to-point links.
    let ip = local.or(address)?;
    Some(Address {
        ip,
        prefix_len: msg.header.prefix_len,
        label,
        broadcast,
        scope: u8::from(msg.header.scope),
    })
}

fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}

fn route_from_message(msg: &RouteMessage, index: u32) -> Option<Route> {
    let mut oif = None;
    let mut destination = None;
    let mut gateway = None;
    let mut source = None;
    let mut priority = None;
    let mut table = u32::from(msg.header.table);
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Oif(i) => oif = Some(*i),
            RouteAttribute::Destination(a) => destination = route_address(a),
            RouteAttribute::Gateway(a) => gateway = route_address(a),
            RouteAttribute::PrefSource(a) => source = route_address(a),
            RouteAttribute::Priority(p) => priority = Some(*p),
            RouteAttribute::Table(t) => table = *t,
            _ => {}
        }
    }
    // Local-table entries are generated by the kernel when addresses are assigned.
    if oif != Some(index) || table == LOCAL_ROUTE_TABLE {
        return None;
    }
    Some(Route {
        destination: destination.map(|ip| (ip, msg.header.destination_prefix_length)),
        gateway,
        source,
        scope: u8::from(msg.header.scope),
        table,
        priority,
    })
}

fn route_to_message(index: u32, route: &Route) -> Result<RouteMessage, NetError> {
    let invalid = || NetError::InvalidRoute {
        route: route.to_string(),
    };
    let ips = [
        route.destination.map(|(ip, _)| ip),
        route.gateway,
        route.source,
    ];
    let is_v6 = ips.iter().flatten().any(IpAddr::is_ipv6);
    let is_v4 = ips.iter().flatten().any(IpAddr::is_ipv4);
    if is_v4 && is_v6 {
        return Err(invalid());
    }

    let msg = if is_v6 {
        let mut b = RouteMessageBuilder::<Ipv6Addr>::default()
            .output_interface(index)
            .scope(RouteScope::from(route.scope))
            .table_id(route.table);
        if let Some((IpAddr::V6(dst), len)) = route.destination {
            b = b.destination_prefix(dst, len);
        }
        if let Some(IpAddr::V6(gw)) = route.gateway {
            b = b.gateway(gw);
        }
        if let Some(IpAddr::V6(src)) = route.source {
            b = b.pref_source(src);
        }
        if let Some(p) = route.priority {
            b = b.priority(p);
        }
        b.build()
    } else {
        let mut b = RouteMessageBuilder::<Ipv4Addr>::default()
            .output_interface(index)
            .scope(RouteScope::from(route.scope))
            .table_id(route.table);
        if let Some((IpAddr::V4(dst), len)) = route.destination {
            b = b.destination_prefix(dst, len);
        }
        if let Some(IpAddr::V4(gw)) = route.gateway {
            b = b.gateway(gw);
        }
        if let Some(IpAddr::V4(src)) = route.source {
            b = b.pref_source(src);
        }
        if let Some(p) = route.priority {
            b = b.priority(p);
        }
        b.build()
    };
    Ok(msg)
}

#[cfg(test)]
#[path = "netlink_tests.rs"]
mod netlink_tests;
