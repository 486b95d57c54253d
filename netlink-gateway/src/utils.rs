//! Byte/address conversions shared by the per-object modules. Mirrors
//! `arthur-zhang-netlink-ng::utils` (see `other_examples`).

use std::net::{IpAddr, Ipv4Addr};

use anyhow::{anyhow, bail};
use netlink_packet_route::AF_INET;

pub fn ip_to_bytes(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

pub fn bytes_to_ipv4(bytes: &[u8]) -> anyhow::Result<Ipv4Addr> {
    if bytes.len() != 4 {
        bail!("expected 4 bytes for an ipv4 address, got {}", bytes.len());
    }
    Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

pub fn bytes_to_ip(bytes: &[u8], family: u8) -> anyhow::Result<IpAddr> {
    if family == AF_INET as u8 {
        return Ok(IpAddr::V4(bytes_to_ipv4(bytes)?));
    }
    Err(anyhow!("unsupported address family: {family}"))
}
