// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kernel-independent descriptions of links, addresses and routes.
//!
//! The netlink executor translates kernel messages into these types and back, so the
//! interface-clone engine and its tests never touch raw netlink attributes.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use super::NetError;

/// Link-namespace ID reported for a parent link that lives in the host network namespace.
pub const HOST_LINK_NETNS_ID: i32 = 0;

/// A 48-bit Ethernet hardware address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build from a raw netlink attribute. Returns `None` for non-Ethernet lengths.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.try_into().ok()?;
        Some(Self(octets))
    }

    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetError::InvalidHardwareAddress(s.to_string());

        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

/// Link type, with the mode attribute for the kinds the mover knows how to clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkKind {
    /// macvlan with its raw `IFLA_MACVLAN_MODE` value (e.g. 4 = bridge)
    Macvlan { mode: u32 },
    /// ipvlan with its raw `IFLA_IPVLAN_MODE` value (0 = l2, 1 = l3, 2 = l3s)
    Ipvlan { mode: u16 },
    /// Anything else, by its kernel kind string ("veth", "bridge", ...). Empty for devices
    /// without link info such as physical NICs and loopback.
    Other(String),
}

impl LinkKind {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            LinkKind::Macvlan { .. } => "macvlan",
            LinkKind::Ipvlan { .. } => "ipvlan",
            LinkKind::Other(kind) => kind,
        }
    }
}

impl Default for LinkKind {
    fn default() -> Self {
        LinkKind::Other(String::new())
    }
}

/// Kernel-visible attributes of a single link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkAttrs {
    /// Interface index; 0 asks the kernel to assign one on creation.
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    pub hardware_addr: MacAddr,
    /// Administrative up flag (`IFF_UP`).
    pub up: bool,
    /// Index of the parent link (`IFLA_LINK`) for stacked devices such as macvlan.
    pub parent_index: Option<u32>,
    /// Namespace ID of the parent link as seen from this link's namespace
    /// (`IFLA_LINK_NETNSID`). `None` means the parent is in the same namespace.
    pub link_netns_id: Option<i32>,
    /// Transmit queue length; 0 asks the kernel for its default.
    pub tx_queue_len: u32,
    pub kind: LinkKind,
}

/// An address assigned to a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub ip: IpAddr,
    pub prefix_len: u8,
    /// `IFA_LABEL`. The kernel rejects labels that do not start with the interface name.
    pub label: Option<String>,
    pub broadcast: Option<Ipv4Addr>,
    pub scope: u8,
}

impl Address {
    /// Whether two addresses describe the same assignment, ignoring the label.
    #[must_use]
    pub fn same_assignment(&self, other: &Address) -> bool {
        self.ip == other.ip && self.prefix_len == other.prefix_len
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)?;
        if let Some(label) = &self.label {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

/// A route whose output interface is the link it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Destination network; `None` for the default route.
    pub destination: Option<(IpAddr, u8)>,
    pub gateway: Option<IpAddr>,
    /// Preferred source address (`RTA_PREFSRC`).
    pub source: Option<IpAddr>,
    pub scope: u8,
    pub table: u32,
    pub priority: Option<u32>,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination {
            Some((ip, len)) => write!(f, "{ip}/{len}")?,
            None => write!(f, "default")?,
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        if let Some(src) = self.source {
            write!(f, " src {src}")?;
        }
        write!(f, " table {}", self.table)
    }
}

/// Snapshot of a link together with its addresses and routes, in kernel order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub link: LinkAttrs,
    pub addrs: Vec<Address>,
    pub routes: Vec<Route>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
