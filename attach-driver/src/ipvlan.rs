//! The IPVLAN driver (spec.md §4.F): an L2 IPVLAN child on the parent NIC
//! is created on the host, moved into the container namespace, and
//! addressed there. The child shares the parent's L2/L3 routing domain,
//! so — like the raw-NIC driver, and unlike veth — no host-side
//! policy-routing rules are required.

use ipnetwork::IpNetwork;

use cni_core::{CniError, CniResult};
use net_table::TrafficShaper;
use netlink_gateway::{Address, IpvlanMode, KernelGateway, LinkKind, LinkSpec, Route, RT_TABLE_MAIN};

use crate::config::{CheckConfig, SetupConfig, TeardownConfig};
use crate::driver::NetnsDriver;

fn pod_dst(pod_ip: &IpNetwork) -> CniResult<IpNetwork> {
    IpNetwork::new(pod_ip.ip(), 32).map_err(|e| CniError::Invariant(e.to_string()))
}

pub struct IpvlanDriver;

impl NetnsDriver for IpvlanDriver {
    fn setup(&self, gateway: &dyn KernelGateway, cfg: &SetupConfig) -> CniResult<()> {
        let pod_dst = pod_dst(&cfg.pod_ip)?;

        if let Some(stale) = gateway.link_by_name(&cfg.container_if_name)? {
            gateway.link_del(stale.attrs.index)?;
        }

        gateway.link_add(&LinkSpec {
            name: cfg.container_if_name.clone(),
            mtu: cfg.mtu,
            kind: LinkKind::Ipvlan {
                parent_index: cfg.parent_index,
                mode: IpvlanMode::L2,
            },
            peer_netns_fd: None,
        })?;

        let child = gateway
            .link_by_name(&cfg.container_if_name)?
            .ok_or_else(|| CniError::NotFound(format!("ipvlan child {}", cfg.container_if_name)))?;
        let child_index = child.attrs.index;

        cfg.target_ns
            .run(&mut || {
                // created in the host namespace; move it into whichever
                // namespace this closure is now running in by fd — the same
                // "move by the current namespace's own descriptor" trick the
                // veth driver uses in reverse.
                let here = netns::NetworkNamespace::current()?;
                gateway.link_set_ns_fd(child_index, here.fd())?;

                let link = gateway
                    .link_by_index(child_index)?
                    .ok_or_else(|| anyhow::anyhow!("ipvlan child missing after namespace move"))?;
                gateway.link_set_up(link.attrs.index)?;
                gateway.addr_add(
                    link.attrs.index,
                    &Address {
                        ipnet: Some(pod_dst),
                    },
                )?;
                gateway.route_add(&Route {
                    dst: None,
                    gw: Some(cfg.gateway),
                    link_index: link.attrs.index,
                    table: RT_TABLE_MAIN,
                    ..Default::default()
                })?;
                for extra in &cfg.extra_routes {
                    gateway.route_add(&Route {
                        dst: Some(extra.dst),
                        gw: Some(cfg.gateway),
                        link_index: link.attrs.index,
                        table: RT_TABLE_MAIN,
                        ..Default::default()
                    })?;
                }
                if cfg.egress > 0 {
                    TrafficShaper::apply(gateway, link.attrs.index, cfg.egress)?;
                }
                Ok(())
            })
            .map_err(CniError::Other)?;

        Ok(())
    }

    fn teardown(&self, gateway: &dyn KernelGateway, cfg: &TeardownConfig) -> CniResult<()> {
        let container_if_name = cfg.container_if_name.clone();
        let index = cfg
            .target_ns
            .run(&mut || {
                let link = gateway.link_by_name(&container_if_name)?;
                Ok(link.map(|l| l.attrs.index))
            })
            .map_err(CniError::Other)?;

        // the ipvlan child is destroyed in its own namespace: there is no
        // "move back" step, the device simply ceases to exist when the
        // namespace goes away or is deleted explicitly here.
        if let Some(index) = index {
            let result = cfg.target_ns.run(&mut || {
                gateway.link_del(index)?;
                Ok(())
            });
            if let Err(e) = result {
                if !cni_core::error::is_not_found_error(&e) {
                    return Err(CniError::Other(e));
                }
            }
        }
        Ok(())
    }

    fn check(&self, gateway: &dyn KernelGateway, cfg: &CheckConfig) -> CniResult<()> {
        let container_if_name = cfg.container_if_name.clone();
        let pod_dst = pod_dst(&cfg.pod_ip)?;

        let result = cfg.target_ns.run(&mut || {
            let link = gateway
                .link_by_name(&container_if_name)?
                .ok_or_else(|| anyhow::anyhow!("ipvlan child {container_if_name} not found"))?;
            if !matches!(link.kind, LinkKind::Ipvlan { .. }) {
                anyhow::bail!("link type mismatch: want ipvlan, got {}", link.type_name());
            }
            let addrs = gateway.addr_list(link.attrs.index)?;
            if !addrs.iter().any(|a| a.ipnet == Some(pod_dst)) {
                anyhow::bail!("ipvlan child missing pod address {pod_dst}");
            }
            Ok(())
        });

        if let Err(e) = result {
            (cfg.record_pod_event)(&format!("ipvlan driver failed to check nic: {e:#}"));
        }
        Ok(())
    }
}
