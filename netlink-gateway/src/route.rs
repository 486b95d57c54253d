//! Route operations (spec.md §4.A): add/replace/delete/list, plus the
//! `route_get_src` probe (SPEC_FULL.md §2) used to find the node's primary
//! bind address the way `k8snet.ChooseBindAddress` does.

use std::net::IpAddr;

use anyhow::anyhow;
use ipnetwork::IpNetwork;
use log::{debug, info};
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST};
use netlink_packet_route::route::nlas::Nla;
use netlink_packet_route::{RouteMessage, RtnlMessage, AF_INET, RT_TABLE_MAIN, RT_TABLE_UNSPEC};

use crate::error::{GatewayError, GatewayResult};
use crate::handle::with_handle;
use crate::types::{Route, RouteFilter};
use crate::utils::{bytes_to_ipv4, ip_to_bytes};

fn new_route_msg() -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = AF_INET as u8;
    msg.header.table = RT_TABLE_MAIN;
    msg
}

fn route_to_msg(route: &Route) -> GatewayResult<RouteMessage> {
    let mut msg = new_route_msg();
    msg.header.scope = route.scope;
    msg.header.flags = route.flags;
    if let Some(dst) = route.dst {
        msg.header.destination_prefix_length = dst.prefix();
        msg.nlas.push(Nla::Destination(ip_to_bytes(&dst.ip())));
    }
    if let Some(gw) = route.gw {
        msg.nlas.push(Nla::Gateway(ip_to_bytes(&gw)));
    }
    if let Some(src) = route.src {
        msg.nlas.push(Nla::PrefSource(ip_to_bytes(&src)));
    }
    if route.link_index != 0 {
        msg.nlas.push(Nla::Oif(route.link_index));
    }
    if route.table > u8::MAX as u32 {
        msg.header.table = RT_TABLE_UNSPEC;
        msg.nlas.push(Nla::Table(route.table));
    } else if route.table != 0 {
        msg.header.table = route.table as u8;
    }
    Ok(msg)
}

pub fn route_add(route: &Route) -> GatewayResult<()> {
    info!("route_add: {:?} table {}", route.dst, route.table);
    let msg = route_to_msg(route)?;
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewRoute(msg),
            NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn route_replace(route: &Route) -> GatewayResult<()> {
    info!("route_replace: {:?} table {}", route.dst, route.table);
    let msg = route_to_msg(route)?;
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewRoute(msg),
            NLM_F_CREATE | NLM_F_REPLACE | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn route_del(route: &Route) -> GatewayResult<()> {
    info!("route_del: {:?} table {}", route.dst, route.table);
    let msg = route_to_msg(route)?;
    with_handle(|h| h.execute(RtnlMessage::DelRoute(msg), NLM_F_ACK).map(|_| ()))
}

pub fn route_list(filter: RouteFilter) -> GatewayResult<Vec<Route>> {
    debug!("route_list: table {:?}", filter.table);
    let mut msg = RouteMessage::default();
    msg.header.address_family = AF_INET as u8;
    msg.header.table = RT_TABLE_UNSPEC;
    let replies = with_handle(|h| h.execute(RtnlMessage::GetRoute(msg), NLM_F_REQUEST | NLM_F_DUMP))?;
    let mut out = Vec::new();
    for reply in replies {
        let route = msg_to_route(reply)?;
        if let Some(table) = filter.table {
            if route.table != table {
                continue;
            }
        }
        if let Some(dst) = filter.dst {
            if route.dst != Some(dst) {
                continue;
            }
        }
        if let Some(link_index) = filter.link_index {
            if route.link_index != link_index {
                continue;
            }
        }
        out.push(route);
    }
    Ok(out)
}

/// "What source address would a packet to `dst` take" — `RTM_GETROUTE`
/// without a dump flag, a single lookup rather than a table scan.
pub fn route_get_src(dst: IpAddr) -> GatewayResult<Option<IpAddr>> {
    debug!("route_get_src: probing toward {dst}");
    let mut msg = new_route_msg();
    msg.header.destination_prefix_length = 32;
    msg.nlas.push(Nla::Destination(ip_to_bytes(&dst)));
    let replies = with_handle(|h| h.execute(RtnlMessage::GetRoute(msg), NLM_F_REQUEST))?;
    for reply in replies {
        let route = msg_to_route(reply)?;
        if route.src.is_some() {
            return Ok(route.src);
        }
    }
    Ok(None)
}

fn msg_to_route(msg: RtnlMessage) -> GatewayResult<Route> {
    let msg = match msg {
        RtnlMessage::NewRoute(m) => m,
        _ => return Err(GatewayError::Other(anyhow!("unexpected reply to GetRoute"))),
    };
    let mut route = Route {
        scope: msg.header.scope,
        flags: msg.header.flags,
        table: msg.header.table as u32,
        ..Default::default()
    };
    for nla in &msg.nlas {
        match nla {
            Nla::Destination(bytes) => {
                let ip = bytes_to_ipv4(bytes)?;
                route.dst = Some(IpNetwork::new(ip.into(), msg.header.destination_prefix_length)?);
            }
            Nla::Gateway(bytes) => route.gw = Some(bytes_to_ipv4(bytes)?.into()),
            Nla::PrefSource(bytes) => route.src = Some(bytes_to_ipv4(bytes)?.into()),
            Nla::Oif(oif) => route.link_index = *oif,
            Nla::Table(table) => route.table = *table,
            _ => {}
        }
    }
    Ok(route)
}
