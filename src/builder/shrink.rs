//! The shrink (leave) builder: drains then removes the leaving
//! servers, reusing the `drain`/`uninstall-host` executors.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{DnsConfig, OperationType, Phase, PhaseData, Plan, ServerSpec};

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    runtime_package: stratum_common::plan::PackageLocator,
    remaining: Vec<ServerSpec>,
    leaving: Vec<ServerSpec>,
) -> Plan {
    let mut roots = Vec::new();
    let mut step = 0u32;

    let drain_id = PhaseId::root("drain");
    let drain_children = leaving
        .iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(drain_id.child(&server.hostname), &format!("drain {}", server.hostname), "drain", i as u32, vec![])
                .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();
    roots.push(Phase::composite(drain_id.clone(), "drain leaving hosts", step, true, drain_children));
    step += 1;

    let remove_id = PhaseId::root("remove");
    let remove_children = leaving
        .iter()
        .enumerate()
        .map(|(i, server)| {
            let host_drain = drain_id.child(&server.hostname);
            Phase::leaf(remove_id.child(&server.hostname), &format!("uninstall {}", server.hostname), "uninstall-host", i as u32, vec![host_drain])
                .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();
    roots.push(Phase::composite(remove_id, "remove leaving hosts", step, true, remove_children));

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Shrink,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers: remaining,
        runtime_package,
    }
}
