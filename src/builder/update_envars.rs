//! The update-envars builder: a single parallel fan-out across masters
//! that rewrites the runtime's environment configuration and restarts
//! the affected unit.

use std::collections::HashMap;

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{DnsConfig, OperationType, Phase, PhaseData, Plan, ServerSpec};

use crate::builder::masters;

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    runtime_package: stratum_common::plan::PackageLocator,
    servers: Vec<ServerSpec>,
    envars: HashMap<String, String>,
) -> Plan {
    let root_id = PhaseId::root("update-envars");
    let children = masters(&servers)
        .into_iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(root_id.child(&server.hostname), &format!("rewrite envars on {}", server.hostname), "update-envars", i as u32, vec![])
                .with_data(PhaseData { target_server: Some(server.clone()), labels: envars.clone(), ..Default::default() })
        })
        .collect();

    let roots = vec![Phase::composite(root_id, "rewrite runtime environment", 0, true, children)];

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::UpdateEnvars,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package,
    }
}
