//! The uninstall builder: walks the existing plan's participating
//! servers in reverse and tears each one down.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{DnsConfig, OperationType, Phase, PhaseData, Plan, ServerSpec};

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    runtime_package: stratum_common::plan::PackageLocator,
    servers: Vec<ServerSpec>,
) -> Plan {
    let drain_id = PhaseId::root("drain");
    let drain_children: Vec<Phase> = servers
        .iter()
        .rev()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(drain_id.child(&server.hostname), &format!("drain {}", server.hostname), "drain", i as u32, vec![])
                .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();

    let uninstall_id = PhaseId::root("uninstall-host");
    let uninstall_children: Vec<Phase> = servers
        .iter()
        .rev()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(uninstall_id.child(&server.hostname), &format!("uninstall {}", server.hostname), "uninstall-host", i as u32, vec![drain_id.child(&server.hostname)])
                .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();

    let roots = vec![
        Phase::composite(drain_id, "drain all hosts", 0, true, drain_children),
        Phase::composite(uninstall_id, "uninstall all hosts", 1, true, uninstall_children),
    ];

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Uninstall,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package,
    }
}
