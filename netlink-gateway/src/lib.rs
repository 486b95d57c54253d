//! Kernel-state gateway (spec.md §4.A): a thin capability surface over
//! link/addr/route/rule/neigh/qdisc operations. Stateless — every call
//! opens one `netlink_sys::Socket`, sends a request, and tears the socket
//! down (spec: "every call is a one-shot kernel transaction. No caching.").

mod addr;
mod error;
mod fake;
mod gateway;
mod handle;
mod link;
mod neigh;
mod qdisc;
mod route;
mod rule;
mod types;
mod utils;

pub use error::{GatewayError, GatewayResult};
pub use fake::FakeGateway;
pub use gateway::{KernelGateway, RtnetlinkGateway};
pub use types::{
    Address, Family, IpvlanMode, Link, LinkAttrs, LinkKind, LinkSpec, Neighbor, Route, RouteFilter,
    Rule, Scope, FLAG_ONLINK, NUD_PERMANENT, RT_TABLE_LOCAL, RT_TABLE_MAIN, SCOPE_LINK,
    SCOPE_UNIVERSE,
};
