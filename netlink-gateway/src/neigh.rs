//! Neighbor (ARP) operations (spec.md §4.A / §4.E step 3): add a permanent
//! ARP entry binding the link-local gateway to the host-veth MAC.

use log::info;
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST};
use netlink_packet_route::neighbour::nlas::Nla;
use netlink_packet_route::{NeighbourMessage, RtnlMessage, AF_INET};

use crate::error::GatewayResult;
use crate::handle::with_handle;
use crate::types::{Neighbor, NUD_PERMANENT};
use crate::utils::ip_to_bytes;

pub fn neigh_add(neigh: &Neighbor) -> GatewayResult<()> {
    info!("neigh_add: link {} -> {} at {}", neigh.link_index, neigh.ip, neigh.hardware_addr);
    let mut msg = NeighbourMessage::default();
    msg.header.family = AF_INET as u8;
    msg.header.ifindex = neigh.link_index;
    msg.header.state = neigh.state.max(NUD_PERMANENT);
    msg.nlas.push(Nla::Destination(ip_to_bytes(&neigh.ip)));
    msg.nlas
        .push(Nla::LinkLocalAddress(neigh.hardware_addr.into_array().to_vec()));
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewNeighbour(msg),
            NLM_F_CREATE | NLM_F_REPLACE | NLM_F_REQUEST | NLM_F_ACK,
        )
        .map(|_| ())
    })
}
