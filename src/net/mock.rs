// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory network namespaces for unit tests.
//!
//! [`MockNetNs::enter`] runs the closure immediately, tagging the task with the namespace
//! path so [`MockExecutor`] operations land in that namespace's fake state. Code that is
//! not inside `enter` acts on the host namespace.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Address, LinkAttrs, NetError, NetExecutor, NetNs, NetNsProvider, Route};

pub const MOCK_HOST_NS: &str = "/proc/self/ns/net";
pub const MOCK_NS_DIR: &str = "/var/run/netns";

tokio::task_local! {
    static CURRENT_NS: PathBuf;
}

fn current_ns() -> PathBuf {
    CURRENT_NS
        .try_with(Clone::clone)
        .unwrap_or_else(|_| PathBuf::from(MOCK_HOST_NS))
}

#[derive(Debug, Default, Clone)]
pub struct MockNamespace {
    pub links: Vec<LinkAttrs>,
    pub addrs: BTreeMap<u32, Vec<Address>>,
    pub routes: BTreeMap<u32, Vec<Route>>,
    /// Links whose address dump fails.
    pub unreadable: HashSet<String>,
}

impl MockNamespace {
    pub fn link(&self, name: &str) -> Option<&LinkAttrs> {
        self.links.iter().find(|l| l.name == name)
    }

    pub fn addrs_of(&self, name: &str) -> Vec<Address> {
        self.link(name)
            .and_then(|l| self.addrs.get(&l.index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn routes_of(&self, name: &str) -> Vec<Route> {
        self.link(name)
            .and_then(|l| self.routes.get(&l.index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.links.iter().map(|l| l.name.clone()).collect()
    }
}

#[derive(Debug, Default)]
pub struct MockNetwork {
    pub namespaces: BTreeMap<PathBuf, MockNamespace>,
    next_index: u32,
    /// Every mutating call, as `"<op> <link>@<namespace>"`.
    pub calls: Vec<String>,
    pub panic_on_add_address: bool,
    pub fail_on_add_address: bool,
    /// Adding an IPv4 address also adds its subnet route, as the kernel does.
    pub kernel_prefix_routes: bool,
    /// Number of upcoming link deletes that fail.
    pub failing_link_deletes: u32,
}

/// Shared fake kernel state; clones observe the same namespaces.
#[derive(Clone, Debug)]
pub struct MockExecutor {
    state: Arc<Mutex<MockNetwork>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        let mut network = MockNetwork {
            next_index: 100,
            ..MockNetwork::default()
        };
        network
            .namespaces
            .insert(PathBuf::from(MOCK_HOST_NS), MockNamespace::default());
        Self {
            state: Arc::new(Mutex::new(network)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockNetwork> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn provider(&self) -> MockNetNsProvider {
        MockNetNsProvider {
            exec: self.clone(),
        }
    }

    /// Path of a holder namespace named `name` under the mock namespace directory.
    pub fn ns_path(name: &str) -> PathBuf {
        Path::new(MOCK_NS_DIR).join(name)
    }

    pub fn add_namespace(&self, name: &str) -> PathBuf {
        let path = Self::ns_path(name);
        self.state()
            .namespaces
            .insert(path.clone(), MockNamespace::default());
        path
    }

    /// Insert a link (assigning an index when 0) into the namespace at `ns`.
    pub fn add_link(&self, ns: &Path, mut link: LinkAttrs, addrs: Vec<Address>, routes: Vec<Route>) {
        let mut state = self.state();
        if link.index == 0 {
            state.next_index += 1;
            link.index = state.next_index;
        }
        let namespace = state.namespaces.entry(ns.to_path_buf()).or_default();
        namespace.addrs.insert(link.index, addrs);
        namespace.routes.insert(link.index, routes);
        namespace.links.push(link);
    }

    pub fn host(&self) -> MockNamespace {
        self.namespace(Path::new(MOCK_HOST_NS))
    }

    pub fn namespace(&self, ns: &Path) -> MockNamespace {
        self.state().namespaces.get(ns).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn with_ns<T>(
        &self,
        f: impl FnOnce(&mut MockNamespace, &mut Vec<String>, &Path) -> Result<T, NetError>,
    ) -> Result<T, NetError> {
        let ns = current_ns();
        let mut state = self.state();
        let state = &mut *state;
        let namespace = state.namespaces.get_mut(&ns).ok_or_else(|| NetError::Namespace {
            path: ns.clone(),
            operation: "enter",
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        f(namespace, &mut state.calls, &ns)
    }

    fn find_index(namespace: &MockNamespace, link: &LinkAttrs) -> Result<usize, NetError> {
        namespace
            .links
            .iter()
            .position(|l| l.index == link.index)
            .ok_or_else(|| NetError::LinkNotFound {
                name: link.name.clone(),
            })
    }
}

fn record(calls: &mut Vec<String>, op: &str, link: &str, ns: &Path) {
    calls.push(format!("{op} {link}@{}", ns.display()));
}

fn exists_error(operation: &'static str, what: &impl ToString) -> NetError {
    NetError::AlreadyExists {
        operation,
        what: what.to_string(),
    }
}

/// The route the kernel adds for the subnet of an IPv4 address, with the address as its
/// preferred source.
fn prefix_route(addr: &Address) -> Option<Route> {
    let std::net::IpAddr::V4(ip) = addr.ip else {
        return None;
    };
    let mask = u32::MAX
        .checked_shl(32u32.saturating_sub(u32::from(addr.prefix_len)))
        .unwrap_or(0);
    let network = std::net::Ipv4Addr::from(u32::from(ip) & mask);
    Some(Route {
        source: Some(addr.ip),
        ..link_route(&format!("{network}/{}", addr.prefix_len))
    })
}

#[async_trait]
impl NetExecutor for MockExecutor {
    async fn interfaces(&self) -> Result<Vec<LinkAttrs>, NetError> {
        self.with_ns(|ns, _, _| Ok(ns.links.clone()))
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkAttrs, NetError> {
        self.with_ns(|ns, _, _| {
            ns.link(name).cloned().ok_or_else(|| NetError::LinkNotFound {
                name: name.to_string(),
            })
        })
    }

    async fn set_link_up(&self, link: &LinkAttrs) -> Result<(), NetError> {
        self.with_ns(|ns, calls, path| {
            let i = Self::find_index(ns, link)?;
            ns.links[i].up = true;
            record(calls, "up", &link.name, path);
            Ok(())
        })
    }

    async fn set_link_down(&self, link: &LinkAttrs) -> Result<(), NetError> {
        self.with_ns(|ns, calls, path| {
            let i = Self::find_index(ns, link)?;
            ns.links[i].up = false;
            record(calls, "down", &link.name, path);
            Ok(())
        })
    }

    async fn create_link(&self, link: &LinkAttrs) -> Result<(), NetError> {
        let index = {
            let mut state = self.state();
            state.next_index += 1;
            state.next_index
        };
        self.with_ns(|ns, calls, path| {
            if ns.link(&link.name).is_some() {
                return Err(NetError::LinkExists {
                    name: link.name.clone(),
                });
            }
            let mut created = link.clone();
            created.index = index;
            created.link_netns_id = None;
            ns.addrs.insert(index, Vec::new());
            ns.routes.insert(index, Vec::new());
            ns.links.push(created);
            record(calls, "create", &link.name, path);
            Ok(())
        })
    }

    async fn delete_link(&self, link: &LinkAttrs) -> Result<(), NetError> {
        {
            let mut state = self.state();
            if state.failing_link_deletes > 0 {
                state.failing_link_deletes -= 1;
                return Err(NetError::Netlink {
                    operation: "link delete",
                    source: rtnetlink::Error::NamespaceError("injected failure".to_string()),
                });
            }
        }
        self.with_ns(|ns, calls, path| {
            let i = Self::find_index(ns, link)?;
            let removed = ns.links.remove(i);
            ns.addrs.remove(&removed.index);
            ns.routes.remove(&removed.index);
            record(calls, "delete", &link.name, path);
            Ok(())
        })
    }

    async fn move_link_to_namespace(
        &self,
        link: &LinkAttrs,
        ns_fd: RawFd,
    ) -> Result<(), NetError> {
        let target = {
            let state = self.state();
            usize::try_from(ns_fd)
                .ok()
                .and_then(|fd| state.namespaces.keys().nth(fd).cloned())
        };
        let target = target.ok_or_else(|| NetError::Namespace {
            path: PathBuf::from(format!("fd:{ns_fd}")),
            operation: "setns",
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;

        let moved = self.with_ns(|ns, calls, path| {
            let i = Self::find_index(ns, link)?;
            let moved = ns.links.remove(i);
            // Addresses and routes do not survive a namespace move.
            ns.addrs.remove(&moved.index);
            ns.routes.remove(&moved.index);
            record(calls, "move", &link.name, path);
            Ok(moved)
        })?;
        self.add_link(&target, moved, Vec::new(), Vec::new());
        Ok(())
    }

    async fn addresses(&self, link: &LinkAttrs) -> Result<Vec<Address>, NetError> {
        self.with_ns(|ns, _, _| {
            if ns.unreadable.contains(&link.name) {
                return Err(NetError::Netlink {
                    operation: "address dump",
                    source: rtnetlink::Error::NamespaceError("permission denied".to_string()),
                });
            }
            Self::find_index(ns, link)?;
            Ok(ns.addrs.get(&link.index).cloned().unwrap_or_default())
        })
    }

    async fn add_address(&self, link: &LinkAttrs, addr: &Address) -> Result<(), NetError> {
        let (panic, fail, kernel_prefix_routes) = {
            let state = self.state();
            (
                state.panic_on_add_address,
                state.fail_on_add_address,
                state.kernel_prefix_routes,
            )
        };
        if panic {
            panic!("injected panic while adding {addr} to {}", link.name);
        }
        if fail {
            return Err(NetError::Netlink {
                operation: "address add",
                source: rtnetlink::Error::NamespaceError("injected failure".to_string()),
            });
        }
        self.with_ns(|ns, calls, path| {
            Self::find_index(ns, link)?;
            let addrs = ns.addrs.entry(link.index).or_default();
            if addrs.iter().any(|a| a.same_assignment(addr)) {
                return Err(exists_error("address add", addr));
            }
            addrs.push(addr.clone());
            if kernel_prefix_routes {
                if let Some(route) = prefix_route(addr) {
                    let routes = ns.routes.entry(link.index).or_default();
                    if !routes.contains(&route) {
                        routes.push(route);
                    }
                }
            }
            record(calls, &format!("addr {addr}"), &link.name, path);
            Ok(())
        })
    }

    async fn routes(&self, link: &LinkAttrs) -> Result<Vec<Route>, NetError> {
        self.with_ns(|ns, _, _| {
            Self::find_index(ns, link)?;
            Ok(ns.routes.get(&link.index).cloned().unwrap_or_default())
        })
    }

    async fn add_route(&self, link: &LinkAttrs, route: &Route) -> Result<(), NetError> {
        self.with_ns(|ns, calls, path| {
            Self::find_index(ns, link)?;
            let routes = ns.routes.entry(link.index).or_default();
            // The kernel keys routes on destination, table and priority only.
            if routes.iter().any(|r| {
                r.destination == route.destination
                    && r.table == route.table
                    && r.priority == route.priority
            }) {
                return Err(exists_error("route add", route));
            }
            routes.push(route.clone());
            record(calls, &format!("route {route}"), &link.name, path);
            Ok(())
        })
    }
}

/// A fake namespace; its fd is its position in the mock namespace table.
#[derive(Clone, Debug)]
pub struct MockNetNs {
    path: PathBuf,
    fd: RawFd,
}

impl NetNs for MockNetNs {
    fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.fd
    }

    fn enter<F, Fut, T>(&self, f: F) -> impl Future<Output = Result<T, NetError>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, NetError>> + Send + 'static,
        T: Send + 'static,
    {
        CURRENT_NS.scope(self.path.clone(), async move { f().await })
    }
}

#[derive(Clone, Debug)]
pub struct MockNetNsProvider {
    exec: MockExecutor,
}

impl MockNetNsProvider {
    fn open(&self, path: &Path) -> Result<MockNetNs, NetError> {
        let state = self.exec.state();
        let fd = state
            .namespaces
            .keys()
            .position(|p| p == path)
            .ok_or_else(|| NetError::Namespace {
                path: path.to_path_buf(),
                operation: "open",
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        Ok(MockNetNs {
            path: path.to_path_buf(),
            fd: RawFd::try_from(fd).unwrap_or(RawFd::MAX),
        })
    }
}

impl NetNsProvider for MockNetNsProvider {
    type Ns = MockNetNs;

    fn current_namespace(&self) -> Result<MockNetNs, NetError> {
        self.open(Path::new(MOCK_HOST_NS))
    }

    fn namespace_by_path(&self, path: &Path) -> Result<MockNetNs, NetError> {
        self.open(path)
    }

    fn namespace_paths(&self) -> Result<Vec<PathBuf>, NetError> {
        Ok(self
            .exec
            .state()
            .namespaces
            .keys()
            .filter(|p| p.starts_with(MOCK_NS_DIR))
            .cloned()
            .collect())
    }
}

/// Parameters of a fake holder pod namespace.
pub struct HolderFixture<'a> {
    pub ns_name: &'a str,
    pub pod_ip: &'a str,
    pub iface: &'a str,
    pub mac: &'a str,
    pub multus_addr: &'a str,
    pub parent_netns_id: Option<i32>,
}

impl Default for HolderFixture<'_> {
    fn default() -> Self {
        Self {
            ns_name: "cni-holder-1",
            pod_ip: "10.1.2.3",
            iface: "net1",
            mac: "d6:2f:2b:3f:8f:33",
            multus_addr: "192.168.20.7/24",
            parent_netns_id: Some(0),
        }
    }
}

/// Parse `"a.b.c.d/len"` into an address with `label`.
pub fn addr(cidr: &str, label: &str) -> Address {
    let (ip, len) = cidr.split_once('/').unwrap_or((cidr, "32"));
    Address {
        ip: ip.parse().unwrap(),
        prefix_len: len.parse().unwrap(),
        label: Some(label.to_string()),
        broadcast: None,
        scope: 0,
    }
}

/// Connected route for `cidr`.
pub fn link_route(cidr: &str) -> Route {
    let (ip, len) = cidr.split_once('/').unwrap_or((cidr, "32"));
    Route {
        destination: Some((ip.parse().unwrap(), len.parse().unwrap())),
        gateway: None,
        source: None,
        scope: 253,
        table: 254,
        priority: None,
    }
}

impl MockExecutor {
    /// Build a holder namespace with `eth0` carrying the pod IP and a macvlan Multus
    /// interface whose parent is the host's `eth0` (index 2).
    pub fn add_holder(&self, fixture: &HolderFixture<'_>) -> PathBuf {
        use super::{LinkKind, MacAddr};

        let path = self.add_namespace(fixture.ns_name);
        self.add_link(
            &path,
            LinkAttrs {
                name: "eth0".to_string(),
                mtu: 1500,
                up: true,
                kind: LinkKind::Other("veth".to_string()),
                ..LinkAttrs::default()
            },
            vec![addr(&format!("{}/32", fixture.pod_ip), "eth0")],
            Vec::new(),
        );
        let (net, _) = fixture
            .multus_addr
            .split_once('/')
            .unwrap_or((fixture.multus_addr, ""));
        let octets: Vec<&str> = net.split('.').collect();
        let subnet = format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]);
        self.add_link(
            &path,
            LinkAttrs {
                name: fixture.iface.to_string(),
                mtu: 1500,
                up: true,
                hardware_addr: fixture.mac.parse::<MacAddr>().unwrap(),
                parent_index: Some(2),
                link_netns_id: fixture.parent_netns_id,
                tx_queue_len: 1000,
                kind: LinkKind::Macvlan { mode: 4 },
                ..LinkAttrs::default()
            },
            vec![addr(fixture.multus_addr, fixture.iface)],
            vec![link_route(&subnet)],
        );
        path
    }

    /// Add a plain host interface, e.g. a stale clone.
    pub fn add_host_link(&self, name: &str, mac: &str) {
        self.add_link(
            Path::new(MOCK_HOST_NS),
            LinkAttrs {
                name: name.to_string(),
                hardware_addr: mac.parse().unwrap(),
                kind: super::LinkKind::Macvlan { mode: 4 },
                parent_index: Some(2),
                ..LinkAttrs::default()
            },
            Vec::new(),
            Vec::new(),
        );
    }
}
