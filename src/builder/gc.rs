//! The garbage-collect builder: a single phase, run on the canonical
//! master, that prunes unreferenced package blobs. `gc`'s executor has
//! no target-server requirement (it runs against the cluster store
//! generally), so the phase carries no `target_server`.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{DnsConfig, OperationType, Phase, Plan, ServerSpec};

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    runtime_package: stratum_common::plan::PackageLocator,
    servers: Vec<ServerSpec>,
) -> Plan {
    let roots = vec![Phase::leaf(PhaseId::root("gc"), "prune unreferenced package blobs", "gc", 0, vec![])];

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Gc,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_common::plan::PackageLocator;

    #[test]
    fn gc_plan_is_a_single_phase() {
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", PackageLocator { name: "runtime".into(), version: "1".into() }, vec![]);
        assert_eq!(plan.roots.len(), 1);
        assert_eq!(plan.roots[0].id, PhaseId::root("gc"));
        assert!(plan.roots[0].data.target_server.is_none());
    }
}
