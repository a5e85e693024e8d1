//! The expand (join) builder: reuses `install`'s bootstrap/pull/host
//! fan-out, scoped to only the servers joining the cluster.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{ClusterRole, DnsConfig, OperationType, Phase, PhaseData, Plan, ServerSpec};

use crate::builder::install::{build_bootstrap, build_export, build_host_subtree, build_pull};
use crate::builder::{canonical_master, nodes};
use crate::manifest::ApplicationManifest;

/// `existing` is the cluster's current server snapshot; `joining` are
/// the new servers, already classified by [`crate::builder::classify_servers`]
/// against the existing master count.
pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    manifest: &ApplicationManifest,
    existing: Vec<ServerSpec>,
    joining: Vec<ServerSpec>,
) -> Plan {
    let mut roots = Vec::new();
    let mut step = 0u32;

    roots.push(Phase::leaf(PhaseId::root("checks"), "preflight checks", "checks", step, vec![]));
    step += 1;

    roots.push(build_bootstrap(&joining, step));
    step += 1;

    roots.push(build_pull(&joining, manifest, step));
    step += 1;

    let joining_masters: Vec<&ServerSpec> = joining.iter().filter(|s| s.cluster_role == ClusterRole::Master).collect();
    let joining_nodes: Vec<&ServerSpec> = nodes(&joining);

    roots.push(build_host_subtree(PhaseId::root("masters"), &joining_masters, manifest, step));
    step += 1;
    roots.push(build_host_subtree(PhaseId::root("nodes"), &joining_nodes, manifest, step));
    step += 1;

    let wait_id = PhaseId::root("wait");
    roots.push(Phase::leaf(wait_id.clone(), "wait for runtime", "wait", step, vec![PhaseId::root("masters"), PhaseId::root("nodes")]));
    step += 1;

    if !joining_masters.is_empty() {
        roots.push(build_export(&joining, &wait_id, step));
        step += 1;
    }

    let rbac_id = PhaseId::root("rbac");
    roots.push(
        Phase::leaf(rbac_id, "register joined hosts", "rbac", step, vec![wait_id])
            .with_data(PhaseData { target_server: canonical_master(&existing).cloned(), ..Default::default() }),
    );

    let mut servers = existing;
    servers.extend(joining);

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Expand,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package: manifest.runtime_package.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::classify_servers;
    use crate::manifest::{NodeProfile, ProfileRole};
    use stratum_common::plan::PackageLocator;

    fn manifest() -> ApplicationManifest {
        ApplicationManifest {
            profiles: vec![],
            app_package: PackageLocator { name: "A".into(), version: "1".into() },
            runtime_package: PackageLocator { name: "runtime".into(), version: "1".into() },
            dependencies: vec![],
            optional_components: vec![],
            resource_manifests: vec![],
            installer_hook: None,
            decrypt_hook: None,
        }
    }

    #[test]
    fn expand_only_touches_the_joining_servers() {
        let existing = classify_servers(
            &[NodeProfile { hostname: "m1".into(), advertise_ip: "10.0.0.1".into(), role: ProfileRole::Master }],
            3,
        );
        let joining = classify_servers(
            &[NodeProfile { hostname: "n2".into(), advertise_ip: "10.0.0.2".into(), role: ProfileRole::Node }],
            3,
        );
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest(), existing, joining);
        assert!(plan.find(&PhaseId::new("/pull/n2")).is_some());
        assert!(plan.find(&PhaseId::new("/pull/m1")).is_none());
        assert_eq!(plan.servers.len(), 2);
    }

    #[test]
    fn expand_skips_export_when_no_master_joins() {
        let existing = classify_servers(
            &[NodeProfile { hostname: "m1".into(), advertise_ip: "10.0.0.1".into(), role: ProfileRole::Master }],
            3,
        );
        let joining = classify_servers(
            &[NodeProfile { hostname: "n2".into(), advertise_ip: "10.0.0.2".into(), role: ProfileRole::Node }],
            3,
        );
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest(), existing, joining);
        assert!(plan.find(&PhaseId::root("export")).is_none());
    }

    #[test]
    fn plan_structure_validates() {
        let existing = classify_servers(
            &[NodeProfile { hostname: "m1".into(), advertise_ip: "10.0.0.1".into(), role: ProfileRole::Master }],
            3,
        );
        let joining = classify_servers(
            &[NodeProfile { hostname: "m2".into(), advertise_ip: "10.0.0.9".into(), role: ProfileRole::Master }],
            3,
        );
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest(), existing, joining);
        plan.validate_structure().unwrap();
    }
}
