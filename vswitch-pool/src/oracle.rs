//! The external VPC collaborator (spec.md §6): `DescribeVSwitchByID(ctx, id)
//! -> { id, zone_id, available_ip_count } | error`.

use std::time::Instant;

use thiserror::Error;

use crate::context::Context;

/// Cached vSwitch metadata (spec.md §3 `vSwitchEntry`). `fetched_at` backs
/// the pool's TTL check; it is never compared across entries, only against
/// "now" at lookup time.
#[derive(Debug, Clone)]
pub struct VSwitchEntry {
    pub id: String,
    pub zone_id: String,
    pub available_ip_count: u32,
    pub fetched_at: Instant,
}

#[derive(Debug, Error, Clone)]
#[error("vpc oracle: {0}")]
pub struct OracleError(pub String);

/// Authoritative source for vSwitch metadata, fronted by [`crate::Pool`].
/// A production implementation calls the Alibaba Cloud VPC `DescribeVSwitches`
/// API; tests substitute a hand-written fake that counts calls (SPEC_FULL.md
/// §1.4 — "a hand-written struct counting calls, not a mocking-library
/// proxy").
pub trait VpcOracle: Send + Sync {
    fn describe_vswitch_by_id(&self, ctx: &Context, id: &str) -> Result<VSwitchEntry, OracleError>;
}
