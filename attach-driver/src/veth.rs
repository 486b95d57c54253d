//! The veth driver (spec.md §4.E): host-side veth + policy-routing
//! topology. The most intricate of the three variants because it
//! coordinates a host-side half and a container-side half across a
//! namespace boundary and reconciles policy-routing rules on every call.

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use log::info;
use macaddr::MacAddr6;

use cni_core::{CniError, CniResult};
use net_table::TrafficShaper;
use netlink_gateway::{
    Address, KernelGateway, Link, LinkKind, LinkSpec, Neighbor, Route, RouteFilter, Rule,
    FLAG_ONLINK, NUD_PERMANENT, RT_TABLE_MAIN, SCOPE_LINK, SCOPE_UNIVERSE,
};

use crate::config::{CheckConfig, SetupConfig, TeardownConfig};
use crate::driver::NetnsDriver;
use crate::reconcile::{tolerate_absent, tolerate_exists};

/// Rule priorities (spec.md §6).
const TO_CONTAINER_PRIORITY: u32 = 512;
const FROM_CONTAINER_PRIORITY: u32 = 2048;

fn link_local_gw() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))
}

fn link_local_net() -> CniResult<IpNetwork> {
    Ok(IpNetwork::new(link_local_gw(), 32).map_err(|e| CniError::Invariant(e.to_string()))?)
}

fn pod_dst(pod_ip: &IpNetwork) -> CniResult<IpNetwork> {
    IpNetwork::new(pod_ip.ip(), 32).map_err(|e| CniError::Invariant(e.to_string()))
}

pub struct VethDriver;

impl NetnsDriver for VethDriver {
    fn setup(&self, gateway: &dyn KernelGateway, cfg: &SetupConfig) -> CniResult<()> {
        let pod_dst = pod_dst(&cfg.pod_ip)?;

        // 1. cleanup: stale link from a previous incarnation.
        if let Some(stale) = gateway.link_by_name(&cfg.host_if_name)? {
            info!("deleting stale host link {}", cfg.host_if_name);
            gateway.link_del(stale.attrs.index)?;
        }

        let host_ns = netns::NetworkNamespace::current()
            .map_err(|e| CniError::NamespaceEnter(e.to_string()))?;
        let host_ns_fd = host_ns.fd();

        // 2-4: create the pair, configure the container side, inside target_ns.
        cfg.target_ns
            .run(&mut || setup_container_side(gateway, cfg, &pod_dst, host_ns_fd))
            .map_err(CniError::Other)?;

        // 5. host side.
        let host_link = gateway
            .link_by_name(&cfg.host_if_name)?
            .ok_or_else(|| CniError::NotFound(format!("host veth {} after setup", cfg.host_if_name)))?;
        gateway.link_set_up(host_link.attrs.index)?;
        ensure_host_to_container_route(gateway, &pod_dst, host_link.attrs.index)?;

        // 6. extra routes need the gateway reachable from the host side too.
        if !cfg.extra_routes.is_empty() {
            tolerate_exists(gateway.addr_add(
                host_link.attrs.index,
                &Address {
                    ipnet: Some(link_local_net()?),
                },
            ))?;
        }

        // 7. policy routing, only when attached to a parent NIC.
        if cfg.parent_index != 0 {
            let parent = gateway
                .link_by_index(cfg.parent_index)?
                .ok_or_else(|| CniError::NotFound(format!("parent link {}", cfg.parent_index)))?;
            let table_id = net_table::route_table_for(cfg.parent_index);

            ensure_eni_config(gateway, &parent, cfg.mtu, table_id, cfg.gateway, cfg.primary_ipv4)?;
            cleanup_stale_rules(gateway, &pod_dst)?;

            tolerate_exists(gateway.rule_add(&Rule {
                dst: Some(pod_dst),
                table: RT_TABLE_MAIN,
                priority: TO_CONTAINER_PRIORITY,
                ..Default::default()
            }))?;
            tolerate_exists(gateway.rule_add(&Rule {
                src: Some(pod_dst),
                iif_name: Some(cfg.host_if_name.clone()),
                table: table_id,
                priority: FROM_CONTAINER_PRIORITY,
                ..Default::default()
            }))?;
        }

        // 8. host-side shaping.
        if cfg.ingress > 0 {
            TrafficShaper::apply(gateway, host_link.attrs.index, cfg.ingress).map_err(CniError::Other)?;
        }

        Ok(())
    }

    fn teardown(&self, gateway: &dyn KernelGateway, cfg: &TeardownConfig) -> CniResult<()> {
        let host_link = match gateway.link_by_name(&cfg.host_if_name)? {
            Some(link) => link,
            None => return Ok(()), // nothing to do: already torn down.
        };

        let container_ip = match cfg.container_ip {
            Some(ip) => ip,
            None => read_container_ip(gateway, cfg)?,
        };
        let dst = pod_dst(&IpNetwork::new(container_ip, 32).map_err(|e| CniError::Invariant(e.to_string()))?)?;

        let rules = gateway.rule_list_v4()?;
        let to_container = rules.iter().find(|r| r.dst == Some(dst));
        let from_container = rules.iter().find(|r| r.src == Some(dst));

        if let Some(rule) = to_container {
            tolerate_absent(gateway.rule_del(rule))?;
        }
        if let Some(rule) = from_container {
            tolerate_absent(gateway.rule_del(rule))?;
        }

        // the kernel transitively removes the peer.
        gateway.link_del(host_link.attrs.index)?;
        Ok(())
    }

    fn check(&self, gateway: &dyn KernelGateway, cfg: &CheckConfig) -> CniResult<()> {
        let pod_dst = pod_dst(&cfg.pod_ip)?;

        let container_check = cfg.target_ns.run(&mut || {
            let link = netlink_link_by_name_or_missing(gateway, &cfg.container_if_name)?;
            if !matches!(link.kind, LinkKind::Veth { .. }) {
                anyhow::bail!("link type mismatch: want veth, got {}", link.type_name());
            }
            Ok(())
        });
        if let Err(e) = container_check {
            (cfg.record_pod_event)(&format!("veth driver failed to check nic: {e:#}"));
            return Ok(());
        }

        let host_link = match gateway.link_by_name(&cfg.host_if_name) {
            Ok(Some(link)) => link,
            Ok(None) => {
                (cfg.record_pod_event)(&format!("can't find veth {} on host", cfg.host_if_name));
                return Ok(());
            }
            Err(e) => {
                (cfg.record_pod_event)(&format!("can't find veth {} on host: {e}", cfg.host_if_name));
                return Ok(());
            }
        };

        if ensure_host_to_container_route(gateway, &pod_dst, host_link.attrs.index).is_err() {
            return Ok(());
        }

        if cfg.parent_index == 0 {
            return Ok(());
        }

        let parent = match gateway.link_by_index(cfg.parent_index) {
            Ok(Some(link)) => link,
            _ => {
                (cfg.record_pod_event)(&format!("failed to get nic by id {}", cfg.parent_index));
                return Ok(());
            }
        };
        let table_id = net_table::route_table_for(cfg.parent_index);
        if ensure_eni_config(gateway, &parent, cfg.mtu, table_id, cfg.gateway, cfg.gateway).is_err() {
            return Ok(());
        }

        let rules = match gateway.rule_list_v4() {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };

        reconcile_rule(
            gateway,
            &rules,
            &Rule {
                dst: Some(pod_dst),
                table: RT_TABLE_MAIN,
                priority: TO_CONTAINER_PRIORITY,
                ..Default::default()
            },
            |r| r.dst == Some(pod_dst),
        )?;

        reconcile_rule(
            gateway,
            &rules,
            &Rule {
                src: Some(pod_dst),
                iif_name: Some(cfg.host_if_name.clone()),
                table: table_id,
                priority: FROM_CONTAINER_PRIORITY,
                ..Default::default()
            },
            |r| r.src == Some(pod_dst),
        )?;

        Ok(())
    }
}

fn netlink_link_by_name_or_missing(gateway: &dyn KernelGateway, name: &str) -> anyhow::Result<Link> {
    gateway
        .link_by_name(name)?
        .ok_or_else(|| anyhow::anyhow!("link {name} not found"))
}

/// Executed inside `target_ns`: creates the veth pair, moves the host side
/// out by descriptor, and configures the container side (spec.md §4.E
/// steps 2-4).
fn setup_container_side(
    gateway: &dyn KernelGateway,
    cfg: &SetupConfig,
    pod_dst: &IpNetwork,
    host_ns_fd: i32,
) -> anyhow::Result<()> {
    gateway
        .link_add(&LinkSpec {
            name: cfg.container_if_name.clone(),
            mtu: cfg.mtu,
            kind: LinkKind::Veth {
                peer_name: cfg.host_if_name.clone(),
            },
            peer_netns_fd: None,
        })
        .map_err(|e| anyhow::anyhow!("create veth pair: {e}"))?;

    let container_link = netlink_link_by_name_or_missing(gateway, &cfg.container_if_name)?;
    let host_link = netlink_link_by_name_or_missing(gateway, &cfg.host_if_name)?;
    let host_mac: MacAddr6 = host_link
        .attrs
        .hardware_addr
        .ok_or_else(|| anyhow::anyhow!("host veth has no hardware address"))?;

    gateway.link_set_up(container_link.attrs.index)?;
    gateway.link_set_ns_fd(host_link.attrs.index, host_ns_fd)?;

    gateway.addr_add(
        container_link.attrs.index,
        &Address {
            ipnet: Some(*pod_dst),
        },
    )?;

    gateway.neigh_add(&Neighbor {
        link_index: container_link.attrs.index,
        ip: link_local_gw(),
        hardware_addr: host_mac,
        state: NUD_PERMANENT,
    })?;

    gateway.route_add(&Route {
        dst: None,
        gw: Some(link_local_gw()),
        link_index: container_link.attrs.index,
        scope: SCOPE_UNIVERSE,
        flags: FLAG_ONLINK,
        table: RT_TABLE_MAIN,
        ..Default::default()
    })?;

    if !cfg.extra_routes.is_empty() {
        gateway.route_add(&Route {
            dst: Some(link_local_net().map_err(|e| anyhow::anyhow!(e))?),
            link_index: container_link.attrs.index,
            scope: SCOPE_LINK,
            table: RT_TABLE_MAIN,
            ..Default::default()
        })?;

        for extra in &cfg.extra_routes {
            gateway.route_add(&Route {
                dst: Some(extra.dst),
                gw: Some(link_local_gw()),
                link_index: container_link.attrs.index,
                scope: SCOPE_UNIVERSE,
                flags: FLAG_ONLINK,
                table: RT_TABLE_MAIN,
                ..Default::default()
            })?;
        }
    }

    if cfg.egress > 0 {
        TrafficShaper::apply(gateway, container_link.attrs.index, cfg.egress)?;
    }

    Ok(())
}

fn read_container_ip(gateway: &dyn KernelGateway, cfg: &TeardownConfig) -> CniResult<IpAddr> {
    let container_if_name = cfg.container_if_name.clone();
    let mut found: Option<IpAddr> = None;
    let mut count = 0usize;
    cfg.target_ns
        .run(&mut || {
            let link = netlink_link_by_name_or_missing(gateway, &container_if_name)?;
            let addrs = gateway.addr_list(link.attrs.index)?;
            count = addrs.len();
            found = addrs.first().and_then(|a| a.ipnet).map(|n| n.ip());
            Ok(())
        })
        .map_err(CniError::Other)?;
    if count != 1 {
        return Err(CniError::Invariant(format!(
            "expected exactly one address on {}, found {count}",
            cfg.container_if_name
        )));
    }
    found.ok_or_else(|| CniError::Invariant("container address missing an ipnet".into()))
}

/// Host-to-container `/32` route (spec.md invariant 1 / §4.E step 5,
/// Check step 3): "replace-if-diverges" — a single `NLM_F_REPLACE` call
/// converges regardless of the prior state.
fn ensure_host_to_container_route(gateway: &dyn KernelGateway, pod_dst: &IpNetwork, host_link_index: u32) -> CniResult<()> {
    gateway.route_replace(&Route {
        dst: Some(*pod_dst),
        link_index: host_link_index,
        scope: SCOPE_LINK,
        table: RT_TABLE_MAIN,
        ..Default::default()
    })?;
    Ok(())
}

/// Converges the parent NIC (spec.md §4.E `ensure_eni_config`): force
/// link up, set MTU, remove every address that is not the node's primary
/// bind address, and reconcile the table's default route.
///
/// The node-identity address is probed the way `k8snet.ChooseBindAddress`
/// does — the source address of a route lookup for `0.0.0.0/0` — falling
/// back to `primary_ipv4` when the probe fails (SPEC_FULL.md §2). The probe
/// target is the default route, not `gw`: `gw` differs per ENI, and probing
/// toward it would churn the parent's single primary address across calls
/// for different ENIs instead of converging on one node identity.
pub(crate) fn ensure_eni_config(
    gateway: &dyn KernelGateway,
    parent: &Link,
    mtu: u32,
    table_id: u32,
    gw: IpAddr,
    primary_ipv4: IpAddr,
) -> CniResult<()> {
    gateway.link_set_up(parent.attrs.index)?;

    if parent.attrs.mtu != mtu {
        gateway.link_set_mtu(parent.attrs.index, mtu)?;
    }

    let node_ip = gateway
        .route_get_src(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .ok()
        .flatten()
        .unwrap_or(primary_ipv4);

    let existing_addrs = gateway.addr_list(parent.attrs.index)?;
    let mut removed = 0usize;
    for addr in &existing_addrs {
        let is_node_ip = addr.ipnet.map(|n| n.ip()) == Some(node_ip);
        if !is_node_ip {
            gateway.addr_del(parent.attrs.index, addr)?;
            removed += 1;
        }
    }
    if removed == existing_addrs.len() {
        let node_net = IpNetwork::new(node_ip, 32).map_err(|e| CniError::Invariant(e.to_string()))?;
        tolerate_exists(gateway.addr_add(
            parent.attrs.index,
            &Address {
                ipnet: Some(node_net),
            },
        ))?;
    }

    let table_routes = gateway.route_list(RouteFilter {
        table: Some(table_id),
        dst: None,
        link_index: None,
    })?;
    let defaults: Vec<Route> = table_routes.into_iter().filter(|r| r.dst.is_none()).collect();
    let mut route_removed = 0usize;
    for route in &defaults {
        if route.link_index != parent.attrs.index {
            gateway.route_del(route)?;
            route_removed += 1;
        }
    }
    if route_removed == defaults.len() {
        tolerate_exists(gateway.route_add(&Route {
            dst: None,
            gw: Some(gw),
            link_index: parent.attrs.index,
            scope: SCOPE_UNIVERSE,
            table: table_id,
            flags: FLAG_ONLINK,
            ..Default::default()
        }))?;
    }

    Ok(())
}

/// Deletes every rule whose `src` or `dst` equals `pod_dst` (spec.md
/// invariant 4 / §4.E step 7b). A not-found on delete is retried once
/// with `iif` cleared — an orphaned rule can survive its veth's removal.
fn cleanup_stale_rules(gateway: &dyn KernelGateway, pod_dst: &IpNetwork) -> CniResult<()> {
    let stale: Vec<Rule> = gateway
        .rule_list_v4()?
        .into_iter()
        .filter(|r| r.matches_pod(pod_dst))
        .collect();
    for rule in stale {
        match gateway.rule_del(&rule) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                let mut retry = rule.clone();
                retry.iif_name = None;
                if let Err(e2) = gateway.rule_del(&retry) {
                    if !e2.is_not_found() {
                        return Err(e2.into());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// `Check`'s per-rule reconciliation (spec.md §4.E Check step 4): scan the
/// current list for a rule matching `predicate`; if found with a diverging
/// table/priority (or iif, for the from-container rule), delete it; if
/// none remains, add the intended rule.
fn reconcile_rule(
    gateway: &dyn KernelGateway,
    current: &[Rule],
    intended: &Rule,
    predicate: impl Fn(&Rule) -> bool,
) -> CniResult<()> {
    let mut found = false;
    for rule in current.iter().filter(|r| predicate(r)) {
        let diverges = rule.table != intended.table
            || rule.priority != intended.priority
            || rule.iif_name != intended.iif_name;
        if diverges {
            if let Err(e) = gateway.rule_del(rule) {
                if !e.is_not_found() {
                    continue; // advisory: Check tolerates and keeps scanning.
                }
            }
        } else {
            found = true;
        }
    }
    if !found {
        tolerate_exists(gateway.rule_add(intended))?;
    }
    Ok(())
}
