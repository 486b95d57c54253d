//! In-memory `KernelGateway` used by driver and pool tests (spec.md §9:
//! "tests substitute an in-memory fake and verify invariants directly").
//!
//! The fake keeps one flat namespace of links/addresses/routes/rules —
//! it does not model `setns(2)` isolation. Driver tests rely on host-side
//! and container-side interface names never colliding (true in practice:
//! `cali0` vs `eth0`), so a single shared map is enough to exercise the
//! reconciliation logic without a real kernel.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::KernelGateway;
use crate::types::{Address, Link, LinkAttrs, LinkKind, LinkSpec, Neighbor, Route, RouteFilter, Rule};

#[derive(Debug, Clone)]
struct FakeLink {
    link: Link,
    peer_index: Option<u32>,
}

#[derive(Default)]
struct FakeState {
    links: Vec<FakeLink>,
    addrs: HashMap<u32, Vec<Address>>,
    routes: Vec<Route>,
    rules: Vec<Rule>,
    neighbors: Vec<Neighbor>,
    qdiscs: HashMap<u32, u64>,
    next_index: u32,
    route_src: Option<IpAddr>,
    route_src_probed_dst: Vec<IpAddr>,
}

/// Backs every driver/pool test; `route_get_src` returns whatever
/// [`FakeGateway::set_route_src`] last configured (defaulting to `None`,
/// which makes the driver fall back to the caller-supplied
/// `primary_ipv4`, matching `ensure_eni_config`'s documented fallback).
/// Every call's `dst` argument is recorded too, so tests can assert which
/// destination a caller actually probed (e.g. that `ensure_eni_config`
/// probes the default route rather than a caller-supplied gateway).
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_index: 100,
                ..Default::default()
            }),
        }
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_route_src(&self, ip: IpAddr) {
        self.state.lock().unwrap().route_src = Some(ip);
    }

    /// Every destination `route_get_src` has been called with, in order.
    pub fn route_src_probes(&self) -> Vec<IpAddr> {
        self.state.lock().unwrap().route_src_probed_dst.clone()
    }

    /// Seeds a pre-existing link (used to set up "stale link from a
    /// previous incarnation" scenarios, spec §8 property 2).
    pub fn seed_link(&self, name: &str, kind: LinkKind) -> u32 {
        let mut st = self.state.lock().unwrap();
        let index = st.next_index;
        st.next_index += 1;
        st.links.push(FakeLink {
            link: Link {
                attrs: LinkAttrs {
                    index,
                    name: name.to_string(),
                    ..Default::default()
                },
                kind,
            },
            peer_index: None,
        });
        index
    }

    pub fn links(&self) -> Vec<Link> {
        self.state.lock().unwrap().links.iter().map(|l| l.link.clone()).collect()
    }

    pub fn addrs(&self, link_index: u32) -> Vec<Address> {
        self.state
            .lock()
            .unwrap()
            .addrs
            .get(&link_index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state.lock().unwrap().routes.clone()
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn qdisc_rate(&self, link_index: u32) -> Option<u64> {
        self.state.lock().unwrap().qdiscs.get(&link_index).copied()
    }
}

fn not_found(what: impl Into<String>) -> GatewayError {
    GatewayError::NotFound(what.into())
}

fn already_exists(what: impl Into<String>) -> GatewayError {
    GatewayError::AlreadyExists(what.into())
}

impl KernelGateway for FakeGateway {
    fn link_by_name(&self, name: &str) -> GatewayResult<Option<Link>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.link.attrs.name == name)
            .map(|l| l.link.clone()))
    }

    fn link_by_index(&self, index: u32) -> GatewayResult<Option<Link>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.link.attrs.index == index)
            .map(|l| l.link.clone()))
    }

    fn link_add(&self, spec: &LinkSpec) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.links.iter().any(|l| l.link.attrs.name == spec.name) {
            return Err(already_exists(format!("link {}", spec.name)));
        }
        let index = st.next_index;
        st.next_index += 1;
        let mut peer_index = None;
        if let LinkKind::Veth { peer_name } = &spec.kind {
            if st.links.iter().any(|l| l.link.attrs.name == *peer_name) {
                return Err(already_exists(format!("link {peer_name}")));
            }
            let p_index = st.next_index;
            st.next_index += 1;
            st.links.push(FakeLink {
                link: Link {
                    attrs: LinkAttrs {
                        index: p_index,
                        name: peer_name.clone(),
                        mtu: spec.mtu,
                        ..Default::default()
                    },
                    kind: LinkKind::Veth {
                        peer_name: spec.name.clone(),
                    },
                },
                peer_index: Some(index),
            });
            peer_index = Some(p_index);
        }
        st.links.push(FakeLink {
            link: Link {
                attrs: LinkAttrs {
                    index,
                    name: spec.name.clone(),
                    mtu: spec.mtu,
                    ..Default::default()
                },
                kind: spec.kind.clone(),
            },
            peer_index,
        });
        Ok(())
    }

    fn link_del(&self, index: u32) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let Some(pos) = st.links.iter().position(|l| l.link.attrs.index == index) else {
            return Err(not_found(format!("link index {index}")));
        };
        let removed = st.links.remove(pos);
        if let Some(peer) = removed.peer_index {
            st.links.retain(|l| l.link.attrs.index != peer);
            st.addrs.remove(&peer);
            st.qdiscs.remove(&peer);
        }
        st.addrs.remove(&index);
        st.qdiscs.remove(&index);
        Ok(())
    }

    fn link_set_up(&self, index: u32) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let link = st
            .links
            .iter_mut()
            .find(|l| l.link.attrs.index == index)
            .ok_or_else(|| not_found(format!("link index {index}")))?;
        link.link.attrs.up = true;
        Ok(())
    }

    fn link_set_ns_fd(&self, index: u32, _fd: i32) -> GatewayResult<()> {
        let st = self.state.lock().unwrap();
        if !st.links.iter().any(|l| l.link.attrs.index == index) {
            return Err(not_found(format!("link index {index}")));
        }
        Ok(())
    }

    fn link_set_mtu(&self, index: u32, mtu: u32) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let link = st
            .links
            .iter_mut()
            .find(|l| l.link.attrs.index == index)
            .ok_or_else(|| not_found(format!("link index {index}")))?;
        link.link.attrs.mtu = mtu;
        Ok(())
    }

    fn link_set_master(&self, index: u32, _master_index: u32) -> GatewayResult<()> {
        let st = self.state.lock().unwrap();
        if !st.links.iter().any(|l| l.link.attrs.index == index) {
            return Err(not_found(format!("link index {index}")));
        }
        Ok(())
    }

    fn link_set_name(&self, index: u32, name: &str) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.links.iter().any(|l| l.link.attrs.name == name && l.link.attrs.index != index) {
            return Err(already_exists(format!("link {name}")));
        }
        let link = st
            .links
            .iter_mut()
            .find(|l| l.link.attrs.index == index)
            .ok_or_else(|| not_found(format!("link index {index}")))?;
        link.link.attrs.name = name.to_string();
        Ok(())
    }

    fn addr_list(&self, link_index: u32) -> GatewayResult<Vec<Address>> {
        Ok(self.addrs(link_index))
    }

    fn addr_add(&self, link_index: u32, addr: &Address) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let entry = st.addrs.entry(link_index).or_default();
        if entry.iter().any(|a| a.ipnet == addr.ipnet) {
            return Err(already_exists(format!("address {:?} on {link_index}", addr.ipnet)));
        }
        entry.push(addr.clone());
        Ok(())
    }

    fn addr_del(&self, link_index: u32, addr: &Address) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let entry = st
            .addrs
            .get_mut(&link_index)
            .ok_or_else(|| not_found(format!("address on {link_index}")))?;
        let before = entry.len();
        entry.retain(|a| a.ipnet != addr.ipnet);
        if entry.len() == before {
            return Err(not_found(format!("address {:?} on {link_index}", addr.ipnet)));
        }
        Ok(())
    }

    fn route_list(&self, filter: RouteFilter) -> GatewayResult<Vec<Route>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .routes
            .iter()
            .filter(|r| filter.table.map_or(true, |t| r.table == t))
            .filter(|r| filter.dst.map_or(true, |d| r.dst == Some(d)))
            .filter(|r| filter.link_index.map_or(true, |i| r.link_index == i))
            .cloned()
            .collect())
    }

    fn route_add(&self, route: &Route) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if st
            .routes
            .iter()
            .any(|r| r.dst == route.dst && r.table == route.table)
        {
            return Err(already_exists(format!("route to {:?} table {}", route.dst, route.table)));
        }
        st.routes.push(route.clone());
        Ok(())
    }

    fn route_replace(&self, route: &Route) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        st.routes.retain(|r| !(r.dst == route.dst && r.table == route.table));
        st.routes.push(route.clone());
        Ok(())
    }

    fn route_del(&self, route: &Route) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let before = st.routes.len();
        st.routes.retain(|r| !(r.dst == route.dst && r.table == route.table));
        if st.routes.len() == before {
            return Err(not_found(format!("route to {:?} table {}", route.dst, route.table)));
        }
        Ok(())
    }

    fn route_get_src(&self, dst: IpAddr) -> GatewayResult<Option<IpAddr>> {
        let mut st = self.state.lock().unwrap();
        st.route_src_probed_dst.push(dst);
        Ok(st.route_src)
    }

    fn rule_list_v4(&self) -> GatewayResult<Vec<Rule>> {
        Ok(self.state.lock().unwrap().rules.clone())
    }

    fn rule_add(&self, rule: &Rule) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.rules.iter().any(|r| rules_equal(r, rule)) {
            return Err(already_exists("rule".to_string()));
        }
        st.rules.push(rule.clone());
        Ok(())
    }

    fn rule_del(&self, rule: &Rule) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        let before = st.rules.len();
        st.rules.retain(|r| !rules_equal(r, rule));
        if st.rules.len() == before {
            return Err(not_found("rule".to_string()));
        }
        Ok(())
    }

    fn neigh_add(&self, neigh: &Neighbor) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        st.neighbors
            .retain(|n| !(n.link_index == neigh.link_index && n.ip == neigh.ip));
        st.neighbors.push(neigh.clone());
        Ok(())
    }

    fn qdisc_replace_tbf(&self, link_index: u32, rate_bytes_per_second: u64) -> GatewayResult<()> {
        self.state.lock().unwrap().qdiscs.insert(link_index, rate_bytes_per_second);
        Ok(())
    }

    fn qdisc_del(&self, link_index: u32) -> GatewayResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.qdiscs.remove(&link_index).is_none() {
            return Err(not_found(format!("qdisc on {link_index}")));
        }
        Ok(())
    }
}

fn rules_equal(a: &Rule, b: &Rule) -> bool {
    a.src == b.src && a.dst == b.dst && a.iif_name == b.iif_name && a.table == b.table && a.priority == b.priority
}
