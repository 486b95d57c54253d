//! The capability surface (spec.md §4.A / §9: "Global kernel state ...
//! modeled as an external collaborator behind a capability surface so
//! tests substitute an in-memory fake and verify invariants directly").

use crate::error::GatewayResult;
use crate::types::{Address, Link, LinkSpec, Neighbor, Route, RouteFilter, Rule};
use std::net::IpAddr;

/// One method per spec.md §4.A capability, plus `route_get_src`
/// (SPEC_FULL.md §2's node-identity probe). Object-safe so drivers can hold
/// `&dyn KernelGateway` and tests can substitute `FakeGateway`.
pub trait KernelGateway {
    fn link_by_name(&self, name: &str) -> GatewayResult<Option<Link>>;
    fn link_by_index(&self, index: u32) -> GatewayResult<Option<Link>>;
    fn link_add(&self, link: &LinkSpec) -> GatewayResult<()>;
    fn link_del(&self, index: u32) -> GatewayResult<()>;
    fn link_set_up(&self, index: u32) -> GatewayResult<()>;
    fn link_set_ns_fd(&self, index: u32, fd: i32) -> GatewayResult<()>;
    fn link_set_mtu(&self, index: u32, mtu: u32) -> GatewayResult<()>;
    fn link_set_master(&self, index: u32, master_index: u32) -> GatewayResult<()>;
    fn link_set_name(&self, index: u32, name: &str) -> GatewayResult<()>;

    fn addr_list(&self, link_index: u32) -> GatewayResult<Vec<Address>>;
    fn addr_add(&self, link_index: u32, addr: &Address) -> GatewayResult<()>;
    fn addr_del(&self, link_index: u32, addr: &Address) -> GatewayResult<()>;

    fn route_list(&self, filter: RouteFilter) -> GatewayResult<Vec<Route>>;
    fn route_add(&self, route: &Route) -> GatewayResult<()>;
    fn route_replace(&self, route: &Route) -> GatewayResult<()>;
    fn route_del(&self, route: &Route) -> GatewayResult<()>;
    fn route_get_src(&self, dst: IpAddr) -> GatewayResult<Option<IpAddr>>;

    fn rule_list_v4(&self) -> GatewayResult<Vec<Rule>>;
    fn rule_add(&self, rule: &Rule) -> GatewayResult<()>;
    fn rule_del(&self, rule: &Rule) -> GatewayResult<()>;

    fn neigh_add(&self, neigh: &Neighbor) -> GatewayResult<()>;

    fn qdisc_replace_tbf(&self, link_index: u32, rate_bytes_per_second: u64) -> GatewayResult<()>;
    fn qdisc_del(&self, link_index: u32) -> GatewayResult<()>;
}

/// Real implementation: opens one `netlink_sys::Socket` per call (spec
/// §4.A: "stateless ... no caching"), delegating to the free functions in
/// the sibling modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtnetlinkGateway;

impl KernelGateway for RtnetlinkGateway {
    fn link_by_name(&self, name: &str) -> GatewayResult<Option<Link>> {
        crate::link::link_by_name(name)
    }

    fn link_by_index(&self, index: u32) -> GatewayResult<Option<Link>> {
        crate::link::link_by_index(index)
    }

    fn link_add(&self, link: &LinkSpec) -> GatewayResult<()> {
        crate::link::link_add(link)
    }

    fn link_del(&self, index: u32) -> GatewayResult<()> {
        crate::link::link_del(index)
    }

    fn link_set_up(&self, index: u32) -> GatewayResult<()> {
        crate::link::link_set_up(index)
    }

    fn link_set_ns_fd(&self, index: u32, fd: i32) -> GatewayResult<()> {
        crate::link::link_set_ns_fd(index, fd)
    }

    fn link_set_mtu(&self, index: u32, mtu: u32) -> GatewayResult<()> {
        crate::link::link_set_mtu(index, mtu)
    }

    fn link_set_master(&self, index: u32, master_index: u32) -> GatewayResult<()> {
        crate::link::link_set_master(index, master_index)
    }

    fn link_set_name(&self, index: u32, name: &str) -> GatewayResult<()> {
        crate::link::link_set_name(index, name)
    }

    fn addr_list(&self, link_index: u32) -> GatewayResult<Vec<Address>> {
        crate::addr::addr_list(link_index)
    }

    fn addr_add(&self, link_index: u32, addr: &Address) -> GatewayResult<()> {
        crate::addr::addr_add(link_index, addr)
    }

    fn addr_del(&self, link_index: u32, addr: &Address) -> GatewayResult<()> {
        crate::addr::addr_del(link_index, addr)
    }

    fn route_list(&self, filter: RouteFilter) -> GatewayResult<Vec<Route>> {
        crate::route::route_list(filter)
    }

    fn route_add(&self, route: &Route) -> GatewayResult<()> {
        crate::route::route_add(route)
    }

    fn route_replace(&self, route: &Route) -> GatewayResult<()> {
        crate::route::route_replace(route)
    }

    fn route_del(&self, route: &Route) -> GatewayResult<()> {
        crate::route::route_del(route)
    }

    fn route_get_src(&self, dst: IpAddr) -> GatewayResult<Option<IpAddr>> {
        crate::route::route_get_src(dst)
    }

    fn rule_list_v4(&self) -> GatewayResult<Vec<Rule>> {
        crate::rule::rule_list_v4()
    }

    fn rule_add(&self, rule: &Rule) -> GatewayResult<()> {
        crate::rule::rule_add(rule)
    }

    fn rule_del(&self, rule: &Rule) -> GatewayResult<()> {
        crate::rule::rule_del(rule)
    }

    fn neigh_add(&self, neigh: &Neighbor) -> GatewayResult<()> {
        crate::neigh::neigh_add(neigh)
    }

    fn qdisc_replace_tbf(&self, link_index: u32, rate_bytes_per_second: u64) -> GatewayResult<()> {
        crate::qdisc::qdisc_replace_tbf(link_index, rate_bytes_per_second)
    }

    fn qdisc_del(&self, link_index: u32) -> GatewayResult<()> {
        crate::qdisc::qdisc_del(link_index)
    }
}
