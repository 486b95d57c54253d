//! Route-table mapper (spec.md §4.C) and traffic-shaping helper
//! (spec.md §4.D). Both are small and pure enough to share a crate,
//! matching SPEC_FULL.md's workspace layout.

mod shaper;
mod table;

pub use shaper::TrafficShaper;
pub use table::{parent_index_from_table, route_table_for, TableConfig, RT_TABLE_BASE};
