//! Address operations (spec.md §4.A): list/add/delete an IPv4 address on a link.

use anyhow::anyhow;
use ipnetwork::IpNetwork;
use log::{debug, info};
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST};
use netlink_packet_route::address::nlas::Nla;
use netlink_packet_route::{AddressMessage, RtnlMessage, AF_INET};

use crate::error::{GatewayError, GatewayResult};
use crate::handle::with_handle;
use crate::types::Address;
use crate::utils::{bytes_to_ipv4, ip_to_bytes};

pub fn addr_list(link_index: u32) -> GatewayResult<Vec<Address>> {
    debug!("addr_list: link {link_index}");
    with_handle(|h| {
        let mut msg = AddressMessage::default();
        msg.header.family = AF_INET as u8;
        msg.header.index = link_index;
        let replies = h.execute(RtnlMessage::GetAddress(msg), NLM_F_DUMP | NLM_F_REQUEST)?;
        replies
            .into_iter()
            .filter_map(|m| msg_to_addr(m, link_index).transpose())
            .collect()
    })
}

fn msg_to_addr(msg: RtnlMessage, want_index: u32) -> GatewayResult<Option<Address>> {
    let msg = match msg {
        RtnlMessage::NewAddress(m) => m,
        _ => return Err(GatewayError::Other(anyhow!("unexpected reply to GetAddress"))),
    };
    if msg.header.index != want_index {
        return Ok(None);
    }
    let prefix = msg.header.prefix_len;
    for nla in &msg.nlas {
        if let Nla::Address(bytes) = nla {
            let ip = bytes_to_ipv4(bytes)?;
            return Ok(Some(Address {
                ipnet: Some(IpNetwork::new(ip.into(), prefix)?),
            }));
        }
    }
    Ok(None)
}

pub fn addr_add(link_index: u32, addr: &Address) -> GatewayResult<()> {
    info!("addr_add: link {link_index} -> {:?}", addr.ipnet);
    let msg = build_addr_msg(link_index, addr)?;
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewAddress(msg),
            NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn addr_del(link_index: u32, addr: &Address) -> GatewayResult<()> {
    info!("addr_del: link {link_index} -> {:?}", addr.ipnet);
    let msg = build_addr_msg(link_index, addr)?;
    with_handle(|h| h.execute(RtnlMessage::DelAddress(msg), NLM_F_ACK).map(|_| ()))
}

fn build_addr_msg(link_index: u32, addr: &Address) -> GatewayResult<AddressMessage> {
    let ipnet = addr
        .ipnet
        .ok_or_else(|| GatewayError::Other(anyhow!("address has no ipnet")))?;
    let mut msg = AddressMessage::default();
    msg.header.family = AF_INET as u8;
    msg.header.index = link_index;
    msg.header.prefix_len = ipnet.prefix();
    let bytes = ip_to_bytes(&ipnet.ip());
    msg.nlas.push(Nla::Address(bytes.clone()));
    msg.nlas.push(Nla::Local(bytes));
    Ok(msg)
}
