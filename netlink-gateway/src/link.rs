//! Link operations: list/lookup by name or index, add/delete, set up,
//! move into a namespace by fd, set MTU, set master (spec.md §4.A).

use anyhow::anyhow;
use log::{debug, info};
use macaddr::MacAddr6;
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST};
use netlink_packet_route::link::nlas::{Info, InfoData, InfoKind, InfoVeth, Nla};
use netlink_packet_route::{LinkMessage, RtnlMessage, IFF_UP};

use crate::error::{GatewayError, GatewayResult};
use crate::handle::with_handle;
use crate::types::{Link, LinkAttrs, LinkKind, LinkSpec};

pub fn link_by_name(name: &str) -> GatewayResult<Option<Link>> {
    debug!("link_by_name: {name}");
    let links = link_list()?;
    Ok(links.into_iter().find(|l| l.attrs.name == name))
}

pub fn link_by_index(index: u32) -> GatewayResult<Option<Link>> {
    debug!("link_by_index: {index}");
    let links = link_list()?;
    Ok(links.into_iter().find(|l| l.attrs.index == index))
}

fn link_list() -> GatewayResult<Vec<Link>> {
    with_handle(|h| {
        let msg = LinkMessage::default();
        let replies = h.execute(RtnlMessage::GetLink(msg), NLM_F_DUMP)?;
        replies.into_iter().map(msg_to_link).collect()
    })
}

fn msg_to_link(msg: RtnlMessage) -> GatewayResult<Link> {
    let msg = match msg {
        RtnlMessage::NewLink(m) => m,
        _ => return Err(GatewayError::Other(anyhow!("unexpected reply to GetLink"))),
    };
    let mut attrs = LinkAttrs {
        index: msg.header.index,
        flags: msg.header.flags,
        up: msg.header.flags & IFF_UP != 0,
        ..Default::default()
    };
    let mut kind = LinkKind::Generic;
    for nla in &msg.nlas {
        match nla {
            Nla::IfName(name) => attrs.name = name.clone(),
            Nla::Mtu(mtu) => attrs.mtu = *mtu,
            Nla::Address(addr) => {
                attrs.hardware_addr = mac_from_bytes(addr);
            }
            Nla::Info(infos) => {
                for info in infos {
                    if let Info::Kind(k) = info {
                        kind = match k {
                            InfoKind::Veth => LinkKind::Veth {
                                peer_name: String::new(),
                            },
                            InfoKind::IpVlan => LinkKind::Ipvlan {
                                parent_index: 0,
                                mode: Default::default(),
                            },
                            InfoKind::Bridge => LinkKind::Bridge,
                            _ => LinkKind::Generic,
                        };
                    }
                }
            }
            _ => {}
        }
    }
    Ok(Link { attrs, kind })
}

fn mac_from_bytes(bytes: &[u8]) -> Option<MacAddr6> {
    if bytes.len() != 6 {
        return None;
    }
    Some(MacAddr6::new(
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
    ))
}

pub fn link_add(spec: &LinkSpec) -> GatewayResult<()> {
    let mut msg = LinkMessage::default();
    msg.nlas.push(Nla::IfName(spec.name.clone()));
    if spec.mtu > 0 {
        msg.nlas.push(Nla::Mtu(spec.mtu));
    }
    if let LinkKind::Veth { peer_name } = &spec.kind {
        let mut peer = LinkMessage::default();
        peer.nlas.push(Nla::IfName(peer_name.clone()));
        if let Some(fd) = spec.peer_netns_fd {
            peer.nlas.push(Nla::NetnsFd(fd));
        }
        msg.nlas.push(Nla::Info(vec![
            Info::Kind(InfoKind::Veth),
            Info::Data(InfoData::Veth(InfoVeth::Peer(peer))),
        ]));
    }
    info!("link_add: {} (kind {:?})", spec.name, spec.kind);
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewLink(msg),
            NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn link_del(index: u32) -> GatewayResult<()> {
    info!("link_del: index {index}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    with_handle(|h| h.execute(RtnlMessage::DelLink(msg), NLM_F_ACK).map(|_| ()))
}

pub fn link_set_up(index: u32) -> GatewayResult<()> {
    info!("link_set_up: index {index}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    msg.header.flags = IFF_UP;
    msg.header.change_mask = IFF_UP;
    with_handle(|h| {
        h.execute(RtnlMessage::SetLink(msg), NLM_F_ACK | NLM_F_REQUEST)
            .map(|_| ())
    })
}

pub fn link_set_ns_fd(index: u32, fd: i32) -> GatewayResult<()> {
    info!("link_set_ns_fd: index {index} -> fd {fd}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    msg.nlas.push(Nla::NetnsFd(fd));
    with_handle(|h| {
        h.execute(RtnlMessage::SetLink(msg), NLM_F_ACK | NLM_F_REQUEST)
            .map(|_| ())
    })
}

pub fn link_set_mtu(index: u32, mtu: u32) -> GatewayResult<()> {
    info!("link_set_mtu: index {index} -> {mtu}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    msg.nlas.push(Nla::Mtu(mtu));
    with_handle(|h| {
        h.execute(RtnlMessage::SetLink(msg), NLM_F_ACK | NLM_F_REQUEST)
            .map(|_| ())
    })
}

pub fn link_set_master(index: u32, master_index: u32) -> GatewayResult<()> {
    info!("link_set_master: index {index} -> master {master_index}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    msg.nlas.push(Nla::Master(master_index));
    with_handle(|h| {
        h.execute(RtnlMessage::SetLink(msg), NLM_F_ACK | NLM_F_REQUEST)
            .map(|_| ())
    })
}

/// Renames a link, e.g. the raw-NIC driver renaming a moved parent NIC to
/// `container_if_name` once it lands in the target namespace.
pub fn link_set_name(index: u32, name: &str) -> GatewayResult<()> {
    info!("link_set_name: index {index} -> {name}");
    let mut msg = LinkMessage::default();
    msg.header.index = index;
    msg.nlas.push(Nla::IfName(name.to_string()));
    with_handle(|h| {
        h.execute(RtnlMessage::SetLink(msg), NLM_F_ACK | NLM_F_REQUEST)
            .map(|_| ())
    })
}
