//! Container-attachment drivers (spec.md §4.E / §4.F): three
//! interchangeable `Setup`/`Teardown`/`Check` strategies over the same
//! `NetnsDriver` contract — veth + policy routing, raw-NIC move, and
//! IPVLAN.

mod config;
mod driver;
mod ipvlan;
mod raw_nic;
mod reconcile;
mod veth;

pub use config::{CheckConfig, ExtraRoute, NamespaceRunner, NoopNamespace, RecordPodEvent, SetupConfig, TeardownConfig};
pub use driver::NetnsDriver;
pub use ipvlan::IpvlanDriver;
pub use raw_nic::RawNicDriver;
pub use veth::VethDriver;
