//! Policy-routing rule operations (spec.md §4.A / §4.E steps 7b-7d): list,
//! add, delete IPv4 rules.

use anyhow::anyhow;
use ipnetwork::IpNetwork;
use log::{debug, info};
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST};
use netlink_packet_route::rule::nlas::Nla;
use netlink_packet_route::{RtnlMessage, RuleMessage, AF_INET};

use crate::error::{GatewayError, GatewayResult};
use crate::handle::with_handle;
use crate::types::Rule;
use crate::utils::{bytes_to_ipv4, ip_to_bytes};

fn rule_to_msg(rule: &Rule) -> RuleMessage {
    let mut msg = RuleMessage::default();
    msg.header.family = AF_INET as u8;
    msg.header.table = if rule.table > u8::MAX as u32 {
        0
    } else {
        rule.table as u8
    };
    msg.nlas.push(Nla::Table(rule.table));
    msg.nlas.push(Nla::Priority(rule.priority));
    if let Some(src) = rule.src {
        msg.header.src_len = src.prefix();
        msg.nlas.push(Nla::Source(ip_to_bytes(&src.ip())));
    }
    if let Some(dst) = rule.dst {
        msg.header.dst_len = dst.prefix();
        msg.nlas.push(Nla::Destination(ip_to_bytes(&dst.ip())));
    }
    if let Some(iif) = &rule.iif_name {
        msg.nlas.push(Nla::Iifname(iif.clone()));
    }
    msg
}

pub fn rule_add(rule: &Rule) -> GatewayResult<()> {
    info!(
        "rule_add: src {:?} dst {:?} table {} prio {}",
        rule.src, rule.dst, rule.table, rule.priority
    );
    let msg = rule_to_msg(rule);
    with_handle(|h| {
        h.execute(
            RtnlMessage::NewRule(msg),
            NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        )
        .map(|_| ())
    })
}

pub fn rule_del(rule: &Rule) -> GatewayResult<()> {
    info!(
        "rule_del: src {:?} dst {:?} table {} prio {}",
        rule.src, rule.dst, rule.table, rule.priority
    );
    let msg = rule_to_msg(rule);
    with_handle(|h| h.execute(RtnlMessage::DelRule(msg), NLM_F_ACK).map(|_| ()))
}

pub fn rule_list_v4() -> GatewayResult<Vec<Rule>> {
    debug!("rule_list_v4");
    let mut msg = RuleMessage::default();
    msg.header.family = AF_INET as u8;
    let replies = with_handle(|h| h.execute(RtnlMessage::GetRule(msg), NLM_F_REQUEST | NLM_F_DUMP))?;
    replies.into_iter().map(msg_to_rule).collect()
}

fn msg_to_rule(msg: RtnlMessage) -> GatewayResult<Rule> {
    let msg = match msg {
        RtnlMessage::NewRule(m) => m,
        _ => return Err(GatewayError::Other(anyhow!("unexpected reply to GetRule"))),
    };
    let mut rule = Rule {
        table: 0,
        priority: 0,
        ..Default::default()
    };
    let mut src_ip = None;
    let mut dst_ip = None;
    for nla in &msg.nlas {
        match nla {
            Nla::Source(bytes) => src_ip = Some(bytes_to_ipv4(bytes)?),
            Nla::Destination(bytes) => dst_ip = Some(bytes_to_ipv4(bytes)?),
            Nla::Iifname(name) => rule.iif_name = Some(name.clone()),
            Nla::Table(table) => rule.table = *table,
            Nla::Priority(priority) => rule.priority = *priority,
            _ => {}
        }
    }
    if rule.table == 0 {
        rule.table = msg.header.table as u32;
    }
    if let Some(ip) = src_ip {
        rule.src = Some(IpNetwork::new(ip.into(), msg.header.src_len)?);
    }
    if let Some(ip) = dst_ip {
        rule.dst = Some(IpNetwork::new(ip.into(), msg.header.dst_len)?);
    }
    Ok(rule)
}
