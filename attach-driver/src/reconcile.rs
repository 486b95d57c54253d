//! Small helpers shared by the drivers for the "delete conflicting; add
//! intended" / "tolerate absent" reconciliation discipline (spec.md §9).

use cni_core::CniResult;
use netlink_gateway::GatewayResult;

/// An add that raced an equivalent object into existence is success
/// (spec.md §7: "`AlreadyExists` ... treated as success when the
/// existing object matches intent").
pub fn tolerate_exists(result: GatewayResult<()>) -> CniResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A delete that found nothing to delete is success (spec.md §7:
/// "`NotFound` ... on delete paths: swallowed").
pub fn tolerate_absent(result: GatewayResult<()>) -> CniResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
