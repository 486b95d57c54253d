//! Kernel-object value types (spec.md §3): `Link`, `Address`, `Route`, `Rule`,
//! `Neighbor`. Plain data, no behavior — the gateway trait (`gateway.rs`) is
//! where capability lives.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use macaddr::MacAddr6;

pub type Scope = u8;

pub const SCOPE_UNIVERSE: Scope = 0;
pub const SCOPE_LINK: Scope = 253;

pub const RT_TABLE_MAIN: u32 = 254;
pub const RT_TABLE_LOCAL: u32 = 255;

/// `RTNH_F_ONLINK` — asserts that a gateway is reachable on the outgoing
/// interface even if no attached prefix covers it.
pub const FLAG_ONLINK: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Family {
    V4,
    V6,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkKind {
    #[default]
    Generic,
    Veth {
        peer_name: String,
    },
    Ipvlan {
        parent_index: u32,
        mode: IpvlanMode,
    },
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpvlanMode {
    #[default]
    L2,
    L3,
}

#[derive(Debug, Clone, Default)]
pub struct LinkAttrs {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    pub hardware_addr: Option<MacAddr6>,
    pub flags: u32,
    pub up: bool,
}

/// A link not yet created on the host/namespace — the request shape for
/// `KernelGateway::link_add`.
#[derive(Debug, Clone, Default)]
pub struct LinkSpec {
    pub name: String,
    pub mtu: u32,
    pub kind: LinkKind,
    /// For veth: the fd of the namespace the peer should be created in.
    pub peer_netns_fd: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub attrs: LinkAttrs,
    pub kind: LinkKind,
}

impl Link {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            LinkKind::Generic => "device",
            LinkKind::Veth { .. } => "veth",
            LinkKind::Ipvlan { .. } => "ipvlan",
            LinkKind::Bridge => "bridge",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Address {
    pub ipnet: Option<IpNetwork>,
}

#[derive(Debug, Clone, Default)]
pub struct Route {
    pub dst: Option<IpNetwork>,
    pub gw: Option<IpAddr>,
    pub src: Option<IpAddr>,
    pub link_index: u32,
    pub scope: Scope,
    pub flags: u32,
    pub table: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    pub table: Option<u32>,
    pub dst: Option<IpNetwork>,
    pub link_index: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub src: Option<IpNetwork>,
    pub dst: Option<IpNetwork>,
    pub iif_name: Option<String>,
    pub table: u32,
    pub priority: u32,
}

impl Rule {
    /// True if this rule's `src` or `dst` is exactly `pod` (spec.md invariant 4 /
    /// Teardown step 3): used both to find stale rules on Setup and to find the
    /// pair of rules to delete on Teardown.
    pub fn matches_pod(&self, pod: &IpNetwork) -> bool {
        self.src.as_ref() == Some(pod) || self.dst.as_ref() == Some(pod)
    }
}

pub const NUD_PERMANENT: u16 = 0x80;

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub link_index: u32,
    pub ip: IpAddr,
    pub hardware_addr: MacAddr6,
    pub state: u16,
}
