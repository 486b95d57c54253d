//! vSwitch selection pool (spec.md §4.G): a per-zone cache of
//! `available_ip_count`/`zone_id` metadata fed by an external VPC oracle,
//! answering "pick one" queries under `Ordered` or `Random` policy.
//!
//! Sits upstream of IPAM in the control flow (spec.md §2): the CNI
//! dispatcher consults this pool to choose a subnet before allocating the
//! next pod IP; it shares the corpus's idempotence/failure posture but has
//! no kernel dependency of its own, so it lives in its own leaf crate.

mod context;
mod oracle;
mod pool;

pub use context::Context;
pub use oracle::{OracleError, VSwitchEntry, VpcOracle};
pub use pool::{Pool, PoolConfig, SelectOptions, SelectionPolicy};
