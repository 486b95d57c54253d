//! The driver contract (spec.md §6 / §9: "interface polymorphism over
//! driver variants ... a capability set `{ setup, teardown, check }`
//! with three concrete variants; dispatch is a tagged selection at the
//! boundary, not dynamic class hierarchy").

use cni_core::CniResult;
use netlink_gateway::KernelGateway;

use crate::config::{CheckConfig, SetupConfig, TeardownConfig};

pub trait NetnsDriver {
    fn setup(&self, gateway: &dyn KernelGateway, cfg: &SetupConfig) -> CniResult<()>;
    fn teardown(&self, gateway: &dyn KernelGateway, cfg: &TeardownConfig) -> CniResult<()>;
    fn check(&self, gateway: &dyn KernelGateway, cfg: &CheckConfig) -> CniResult<()>;
}
