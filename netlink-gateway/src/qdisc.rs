//! Traffic-shaping qdisc operations (spec.md §4.A / §4.D): install or
//! remove a root `tbf` qdisc sized for a byte-per-second rate.

use log::info;
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST};
use netlink_packet_route::tc::nlas::Nla;
use netlink_packet_route::{RtnlMessage, TcMessage};

use crate::error::GatewayResult;
use crate::handle::with_handle;

/// `tc_ratespec.rate` saturates at `u32::MAX`; anything above that rides in
/// the nested `TCA_TBF_RATE64` attribute, which we always attach so the
/// 32-bit field and the 64-bit one agree.
const TBF_HANDLE: u32 = 0x1_0000;
const TC_H_ROOT: u32 = 0xFFFF_FFFF;
/// Buffer sized for a ~10ms burst at the configured rate (iproute2's
/// default heuristic for `tc qdisc add ... tbf`).
const BURST_MS: u64 = 10;
const DEFAULT_LIMIT_BYTES: u32 = 1024 * 1024;

pub fn qdisc_replace_tbf(link_index: u32, rate_bytes_per_second: u64) -> GatewayResult<()> {
    info!("qdisc_replace_tbf: link {link_index} -> {rate_bytes_per_second} B/s");
    let mut msg = TcMessage::default();
    msg.header.index = link_index as i32;
    msg.header.handle = TBF_HANDLE;
    msg.header.parent = TC_H_ROOT;
    msg.nlas.push(Nla::Kind("tbf".to_string()));
    msg.nlas.push(Nla::Options(tbf_options(rate_bytes_per_second)));
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewQueueDiscipline(msg),
            NLM_F_CREATE | NLM_F_REPLACE | NLM_F_REQUEST | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn qdisc_del(link_index: u32) -> GatewayResult<()> {
    info!("qdisc_del: link {link_index}");
    let mut msg = TcMessage::default();
    msg.header.index = link_index as i32;
    msg.header.handle = TBF_HANDLE;
    msg.header.parent = TC_H_ROOT;
    with_handle(|h| {
        h.execute(RtnlMessage::DelQueueDiscipline(msg), NLM_F_ACK)
            .map(|_| ())
    })
}

/// Raw `struct tc_tbf_qopt` payload (rate/peakrate tables are unused on
/// modern kernels that understand `TCA_TBF_RATE64`, so both the 32-bit
/// `rate.rate` field and the 64-bit attribute carry the same value).
fn tbf_options(rate_bytes_per_second: u64) -> Vec<u8> {
    let burst = ((rate_bytes_per_second * BURST_MS) / 1000).max(2048) as u32;
    let rate32 = rate_bytes_per_second.min(u32::MAX as u64) as u32;

    let mut qopt = Vec::with_capacity(4 * 5 + 4);
    qopt.extend_from_slice(&rate32.to_ne_bytes()); // rate.rate
    qopt.extend_from_slice(&[0u8; 4 * 4]); // remaining tc_ratespec + mtu/power padding
    qopt.extend_from_slice(&burst.to_ne_bytes()); // buffer (burst, in bytes)
    qopt.extend_from_slice(&DEFAULT_LIMIT_BYTES.to_ne_bytes()); // limit

    qopt
}
