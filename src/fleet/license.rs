//! License enforcement for a peer group: bounds both headcount and
//! per-peer CPU count.

use stratum_common::errors::{OpeError, OpeResult};
use stratum_common::fleet::SystemInfo;

#[derive(Debug, Clone, Copy)]
pub struct LicenseLimits {
    pub max_nodes: usize,
    pub max_cpus_per_node: u32,
}

/// `total` counts the peer about to join: `existing_peers + 1`.
pub fn enforce_license(license: &LicenseLimits, existing_peers: usize, joining: &SystemInfo) -> OpeResult<()> {
    let total = existing_peers + 1;
    if total > license.max_nodes {
        return Err(OpeError::LicenseLimitExceeded {
            message: format!("license allows {} nodes, {total} would be in the group", license.max_nodes),
        });
    }
    if joining.cpus > license.max_cpus_per_node {
        return Err(OpeError::LicenseLimitExceeded {
            message: format!("license allows {} cpus per node, {} joined with {}", license.max_cpus_per_node, joining.hostname, joining.cpus),
        });
    }
    Ok(())
}
