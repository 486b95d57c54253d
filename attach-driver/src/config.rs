//! Input/output shapes for the `NetnsDriver` contract (spec.md §4.E /
//! §4.F), mirroring the Go `CheckConfig` and `Setup`/`Teardown` parameter
//! lists (`original_source/plugin/driver/drivers.go`).

use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;

/// Runs `f` "inside" a namespace. `netns::NetworkNamespace` is the real
/// implementation (component B); tests substitute [`NoopNamespace`] so the
/// in-memory [`netlink_gateway::FakeGateway`] (namespace-oblivious by
/// design, see its module docs) can stand in for both sides of a veth
/// pair without requiring `CAP_SYS_ADMIN`.
pub trait NamespaceRunner: Send + Sync {
    fn run(&self, f: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()>;
}

impl NamespaceRunner for netns::NetworkNamespace {
    fn run(&self, f: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()> {
        netns::with_namespace(self, f)
    }
}

/// Runs the closure in the current namespace without crossing anything —
/// used by tests that exercise reconciliation logic against a
/// [`netlink_gateway::FakeGateway`], where there is no real namespace to
/// enter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNamespace;

impl NamespaceRunner for NoopNamespace {
    fn run(&self, f: &mut dyn FnMut() -> anyhow::Result<()>) -> anyhow::Result<()> {
        f()
    }
}

/// One extra route to install beyond the default (spec.md §4.E step 3).
#[derive(Debug, Clone)]
pub struct ExtraRoute {
    pub dst: IpNetwork,
}

/// Inputs to `Setup` (spec.md §4.E). `parent_index == 0` means "no
/// parent, skip policy-routing wiring".
pub struct SetupConfig {
    pub host_if_name: String,
    pub container_if_name: String,
    pub pod_ip: IpNetwork,
    pub primary_ipv4: IpAddr,
    pub gateway: IpAddr,
    pub extra_routes: Vec<ExtraRoute>,
    pub parent_index: u32,
    pub ingress: u64,
    pub egress: u64,
    pub mtu: u32,
    pub target_ns: Arc<dyn NamespaceRunner>,
}

/// Inputs to `Teardown` (spec.md §4.E). `container_ip` lets the caller
/// skip the "read the single address off the container veth" probe
/// (spec §8 scenario S4).
pub struct TeardownConfig {
    pub host_if_name: String,
    pub container_if_name: String,
    pub target_ns: Arc<dyn NamespaceRunner>,
    pub container_ip: Option<IpAddr>,
}

pub type RecordPodEvent = Arc<dyn Fn(&str) + Send + Sync>;

/// Inputs to `Check` (spec.md §4.E), mirroring the Go `CheckConfig`.
pub struct CheckConfig {
    pub target_ns: Arc<dyn NamespaceRunner>,
    pub host_if_name: String,
    pub container_if_name: String,
    pub parent_index: u32,
    pub mtu: u32,
    pub pod_ip: IpNetwork,
    pub gateway: IpAddr,
    pub record_pod_event: RecordPodEvent,
}
