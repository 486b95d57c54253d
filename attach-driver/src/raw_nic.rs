//! The raw-NIC driver (spec.md §4.F): the parent NIC itself is moved into
//! the container namespace, configured there, and moved back to the host
//! on teardown. No policy-routing rules — the container owns the NIC's
//! whole routing domain while attached.

use ipnetwork::IpNetwork;

use cni_core::{CniError, CniResult};
use net_table::TrafficShaper;
use netlink_gateway::{Address, KernelGateway, Route, RouteFilter, FLAG_ONLINK, RT_TABLE_MAIN, SCOPE_UNIVERSE};

use crate::config::{CheckConfig, SetupConfig, TeardownConfig};
use crate::driver::NetnsDriver;

fn pod_dst(pod_ip: &IpNetwork) -> CniResult<IpNetwork> {
    IpNetwork::new(pod_ip.ip(), 32).map_err(|e| CniError::Invariant(e.to_string()))
}

pub struct RawNicDriver;

impl NetnsDriver for RawNicDriver {
    fn setup(&self, gateway: &dyn KernelGateway, cfg: &SetupConfig) -> CniResult<()> {
        let pod_dst = pod_dst(&cfg.pod_ip)?;
        let parent = gateway
            .link_by_index(cfg.parent_index)?
            .ok_or_else(|| CniError::NotFound(format!("parent link {}", cfg.parent_index)))?;

        if parent.attrs.mtu != cfg.mtu {
            gateway.link_set_mtu(parent.attrs.index, cfg.mtu)?;
        }

        let host_ns = netns::NetworkNamespace::current()
            .map_err(|e| CniError::NamespaceEnter(e.to_string()))?;
        let host_ns_fd = host_ns.fd();

        gateway.link_set_ns_fd(parent.attrs.index, host_ns_fd)?;
        // once moved, the index is stable but the name is still the host's
        // original parent name; rename it to `container_if_name` inside the
        // target namespace so Teardown can find it by name symmetrically.
        let parent_index = parent.attrs.index;
        let extra_routes = cfg.extra_routes.clone();
        let container_if_name = cfg.container_if_name.clone();
        let gw = cfg.gateway;
        let egress = cfg.egress;

        cfg.target_ns
            .run(&mut || {
                let link = gateway
                    .link_by_index(parent_index)?
                    .ok_or_else(|| anyhow::anyhow!("parent nic missing after namespace move"))?;
                gateway.link_set_name(link.attrs.index, &container_if_name)?;
                gateway.link_set_up(link.attrs.index)?;
                gateway.addr_add(
                    link.attrs.index,
                    &Address {
                        ipnet: Some(pod_dst),
                    },
                )?;
                gateway.route_add(&Route {
                    dst: None,
                    gw: Some(gw),
                    link_index: link.attrs.index,
                    scope: SCOPE_UNIVERSE,
                    flags: FLAG_ONLINK,
                    table: RT_TABLE_MAIN,
                    ..Default::default()
                })?;
                for extra in &extra_routes {
                    gateway.route_add(&Route {
                        dst: Some(extra.dst),
                        gw: Some(gw),
                        link_index: link.attrs.index,
                        scope: SCOPE_UNIVERSE,
                        flags: FLAG_ONLINK,
                        table: RT_TABLE_MAIN,
                        ..Default::default()
                    })?;
                }
                if egress > 0 {
                    TrafficShaper::apply(gateway, link.attrs.index, egress)?;
                }
                Ok(())
            })
            .map_err(CniError::Other)?;

        Ok(())
    }

    fn teardown(&self, gateway: &dyn KernelGateway, cfg: &TeardownConfig) -> CniResult<()> {
        let host_ns = netns::NetworkNamespace::current()
            .map_err(|e| CniError::NamespaceEnter(e.to_string()))?;
        let host_ns_fd = host_ns.fd();
        let container_if_name = cfg.container_if_name.clone();

        cfg.target_ns
            .run(&mut || {
                let link = match gateway.link_by_name(&container_if_name)? {
                    Some(link) => link,
                    None => return Ok(()), // already moved back, or never attached.
                };
                gateway.link_set_ns_fd(link.attrs.index, host_ns_fd)?;
                Ok(())
            })
            .map_err(CniError::Other)?;

        Ok(())
    }

    fn check(&self, gateway: &dyn KernelGateway, cfg: &CheckConfig) -> CniResult<()> {
        let container_if_name = cfg.container_if_name.clone();
        let pod_dst = pod_dst(&cfg.pod_ip)?;

        let result = cfg.target_ns.run(&mut || {
            let link = gateway
                .link_by_name(&container_if_name)?
                .ok_or_else(|| anyhow::anyhow!("nic {container_if_name} not found in container namespace"))?;
            if !link.attrs.up {
                anyhow::bail!("nic {container_if_name} is down");
            }
            let addrs = gateway.addr_list(link.attrs.index)?;
            if !addrs.iter().any(|a| a.ipnet == Some(pod_dst)) {
                anyhow::bail!("nic {container_if_name} missing pod address {pod_dst}");
            }
            let routes = gateway.route_list(RouteFilter {
                table: Some(RT_TABLE_MAIN),
                dst: None,
                link_index: Some(link.attrs.index),
            })?;
            if !routes.iter().any(|r| r.dst.is_none()) {
                anyhow::bail!("nic {container_if_name} missing default route");
            }
            Ok(())
        });

        if let Err(e) = result {
            (cfg.record_pod_event)(&format!("raw-nic driver failed to check nic: {e:#}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use netlink_gateway::FakeGateway;

    use super::*;
    use crate::config::NoopNamespace;

    fn cfg(parent_index: u32) -> SetupConfig {
        SetupConfig {
            host_if_name: "unused".to_string(),
            container_if_name: "eth0".to_string(),
            pod_ip: IpNetwork::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 24).unwrap(),
            primary_ipv4: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            gateway: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            extra_routes: vec![],
            parent_index,
            ingress: 0,
            egress: 0,
            mtu: 1500,
            target_ns: Arc::new(NoopNamespace),
        }
    }

    fn seed_parent(gw: &FakeGateway) -> u32 {
        gw.seed_link("eth1", netlink_gateway::LinkKind::Generic)
    }

    #[test]
    fn setup_renames_and_addresses_the_moved_nic() {
        let gw = FakeGateway::new();
        let parent_index = seed_parent(&gw);

        let driver = RawNicDriver;
        let setup = cfg(parent_index);
        driver.setup(&gw, &setup).unwrap();

        assert!(gw.link_by_name("eth1").unwrap().is_none(), "the old name must be gone");
        let link = gw.link_by_name("eth0").unwrap().expect("nic renamed to container_if_name");
        assert_eq!(link.attrs.index, parent_index);
        assert!(link.attrs.up);

        let pod_dst = IpNetwork::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 32).unwrap();
        assert!(gw.addrs(link.attrs.index).iter().any(|a| a.ipnet == Some(pod_dst)));
        assert!(gw.routes().iter().any(|r| r.dst.is_none() && r.link_index == link.attrs.index));
    }

    #[test]
    fn check_passes_after_setup() {
        let gw = FakeGateway::new();
        let parent_index = seed_parent(&gw);
        let driver = RawNicDriver;
        driver.setup(&gw, &cfg(parent_index)).unwrap();

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let check_cfg = CheckConfig {
            target_ns: Arc::new(NoopNamespace),
            host_if_name: "unused".to_string(),
            container_if_name: "eth0".to_string(),
            parent_index,
            mtu: 1500,
            pod_ip: IpNetwork::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 24).unwrap(),
            gateway: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            record_pod_event: Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string())),
        };
        driver.check(&gw, &check_cfg).unwrap();
        assert!(events.lock().unwrap().is_empty(), "a healthy nic should not be reported");
    }

    #[test]
    fn teardown_moves_the_nic_back_by_its_container_name() {
        let gw = FakeGateway::new();
        let parent_index = seed_parent(&gw);
        let driver = RawNicDriver;
        driver.setup(&gw, &cfg(parent_index)).unwrap();

        let teardown = TeardownConfig {
            host_if_name: "unused".to_string(),
            container_if_name: "eth0".to_string(),
            target_ns: Arc::new(NoopNamespace),
            container_ip: None,
        };
        driver.teardown(&gw, &teardown).unwrap();

        // link_set_ns_fd in the fake is namespace-oblivious, so the link
        // itself survives under its container name; the real gateway moves
        // it back to the host namespace by descriptor.
        assert!(gw.link_by_name("eth0").unwrap().is_some());

        // a second teardown is a no-op, not an error.
        driver.teardown(&gw, &teardown).unwrap();
    }
}
