//! Aggregated node status for the HTTP status endpoint.

use super::NodePool;
use serde::Serialize;

/// Snapshot of all pools, serialized as the `/status` JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Total node slots across pools.
    pub num_instances: usize,
    /// Busy node slots across pools.
    pub used_instances: usize,
    /// One description line per slot.
    pub lines: Vec<String>,
}

impl StatusReport {
    /// Aggregate pools in the given order.
    pub fn collect<'a>(pools: impl IntoIterator<Item = &'a NodePool>) -> Self {
        let mut report = Self::default();
        for pool in pools {
            report.num_instances += pool.num_nodes();
            report.used_instances += pool.nodes_used();
            report.lines.extend(pool.status_lines());
        }
        report
    }
}
