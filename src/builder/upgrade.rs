//! The upgrade builder. Reuses `install`'s `/pull` fan-out for the
//! system package update, then splices in the seven-stage etcd subplan
//! (§4.8) ahead of the cluster-controller restart it ends with.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{DnsConfig, ElectionChange, OperationType, Phase, PhaseData, Plan, ServerSpec};

use crate::builder::canonical_master;
use crate::builder::install::build_pull;
use crate::manifest::ApplicationManifest;

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    manifest: &ApplicationManifest,
    servers: Vec<ServerSpec>,
) -> Plan {
    let mut roots = Vec::new();
    let mut step = 0u32;

    roots.push(Phase::leaf(PhaseId::root("checks"), "preflight checks", "checks", step, vec![]));
    step += 1;

    roots.push(Phase::leaf(PhaseId::root("configure"), "configure package", "configure", step, vec![PhaseId::root("checks")]));
    step += 1;

    roots.push(build_pull(&servers, manifest, step));
    step += 1;

    roots.push(build_etcd_subplan(&servers, &PhaseId::root("pull"), step));

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Update,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package: manifest.runtime_package.clone(),
    }
}

/// Builds the `/etcd` subtree per §4.8: backup, shutdown, upgrade,
/// restore (leader only), restart (leader, then masters, then nodes),
/// controller-restart.
pub fn build_etcd_subplan(servers: &[ServerSpec], requires: &PhaseId, step: u32) -> Phase {
    let root = PhaseId::root("etcd");
    let leader = canonical_master(servers).expect("upgrade requires at least one master").clone();

    let backup = parallel_masters(&root, "backup", "etcd-backup", servers, &[requires.clone()], 0);
    let backup_id = backup.id.clone();

    let shutdown = parallel_all(&root, "shutdown", "etcd-shutdown", servers, &leader, &[backup_id.clone()], 1);
    let shutdown_id = shutdown.id.clone();

    let upgrade = parallel_all(&root, "upgrade", "etcd-upgrade", servers, &leader, &[shutdown_id], 2);
    let upgrade_id = upgrade.id.clone();

    let restore_id = root.child("restore");
    let restore = Phase::leaf(restore_id.clone(), "restore backup on leader", "etcd-restore", 3, vec![upgrade_id])
        .with_data(PhaseData { target_server: Some(leader.clone()), backup_path: Some(etcd_backup_path(&leader)), ..Default::default() });

    let restart = build_restart(&root, servers, &leader, &restore_id, 4);
    let restart_id = restart.id.clone();

    let controller_restart = Phase::leaf(
        root.child("controller-restart"),
        "restart cluster controller",
        "etcd-controller-restart",
        5,
        vec![restart_id],
    )
    .with_data(PhaseData { target_server: Some(leader), ..Default::default() });

    Phase::composite(root, "etcd upgrade subplan", step, false, vec![backup, shutdown, upgrade, restore, restart, controller_restart])
}

/// The snapshot path `etcd-backup` writes to and `etcd-restore` reads
/// from, derived from the server's own state directory.
fn etcd_backup_path(server: &ServerSpec) -> String {
    format!("{}/etcd-backup.tar", server.state_dir)
}

fn parallel_masters(root: &PhaseId, segment: &str, executor_key: &str, servers: &[ServerSpec], requires: &[PhaseId], step: u32) -> Phase {
    let id = root.child(segment);
    let children = crate::builder::masters(servers)
        .into_iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(id.child(&server.hostname), &format!("{executor_key} on {}", server.hostname), executor_key, i as u32, requires.to_vec())
                .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();
    Phase::composite(id, segment, step, true, children)
}

fn parallel_all(root: &PhaseId, segment: &str, executor_key: &str, servers: &[ServerSpec], leader: &ServerSpec, requires: &[PhaseId], step: u32) -> Phase {
    let id = root.child(segment);
    let children = servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            let opaque = if server.hostname == leader.hostname { Some("leader".to_string()) } else { None };
            Phase::leaf(id.child(&server.hostname), &format!("{executor_key} on {}", server.hostname), executor_key, i as u32, requires.to_vec())
                .with_data(PhaseData { target_server: Some(server.clone()), opaque, ..Default::default() })
        })
        .collect();
    Phase::composite(id, segment, step, true, children)
}

/// Leader restarts first, then the remaining masters sequentially,
/// then non-master nodes in parallel — per the literal ordering in §8
/// scenario (f).
fn build_restart(root: &PhaseId, servers: &[ServerSpec], leader: &ServerSpec, requires: &PhaseId, step: u32) -> Phase {
    let id = root.child("restart");
    let executor_key = "etcd-restart";

    let leader_leaf = Phase::leaf(id.child(&leader.hostname), &format!("{executor_key} on {}", leader.hostname), executor_key, 0, vec![requires.clone()])
        .with_data(PhaseData { target_server: Some(leader.clone()), ..Default::default() });
    let mut last_id = leader_leaf.id.clone();
    let mut sequence = vec![leader_leaf];

    for master in crate::builder::masters(servers) {
        if master.hostname == leader.hostname {
            continue;
        }
        let leaf = Phase::leaf(id.child(&master.hostname), &format!("{executor_key} on {}", master.hostname), executor_key, sequence.len() as u32, vec![last_id.clone()])
            .with_data(PhaseData { target_server: Some(master.clone()), ..Default::default() });
        last_id = leaf.id.clone();
        sequence.push(leaf);
    }

    let nodes_id = id.child("nodes");
    let node_children: Vec<Phase> = crate::builder::nodes(servers)
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            Phase::leaf(nodes_id.child(&node.hostname), &format!("{executor_key} on {}", node.hostname), executor_key, i as u32, vec![last_id.clone()])
                .with_data(PhaseData { target_server: Some(node.clone()), ..Default::default() })
        })
        .collect();
    if !node_children.is_empty() {
        sequence.push(Phase::composite(nodes_id, "restart nodes", sequence.len() as u32, true, node_children));
    }

    Phase::composite(id, "restart store units", step, false, sequence)
}

/// Describes which masters are affected when election participation
/// must move during an upgrade (unused today, exposed for a future
/// leader-failover builder).
#[allow(dead_code)]
fn election_for(servers: &[ServerSpec]) -> ElectionChange {
    ElectionChange { enable: crate::builder::masters(servers).iter().map(|s| s.hostname.clone()).collect(), disable: vec![] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{NodeProfile, ProfileRole};
    use stratum_common::plan::{ClusterRole, PackageLocator};

    fn sample_servers() -> Vec<ServerSpec> {
        crate::builder::classify_servers(
            &[
                NodeProfile { hostname: "m1".into(), advertise_ip: "10.0.0.1".into(), role: ProfileRole::Master },
                NodeProfile { hostname: "m2".into(), advertise_ip: "10.0.0.2".into(), role: ProfileRole::Master },
                NodeProfile { hostname: "m3".into(), advertise_ip: "10.0.0.3".into(), role: ProfileRole::Master },
                NodeProfile { hostname: "n1".into(), advertise_ip: "10.0.0.4".into(), role: ProfileRole::Node },
                NodeProfile { hostname: "n2".into(), advertise_ip: "10.0.0.5".into(), role: ProfileRole::Node },
            ],
            3,
        )
    }

    fn sample_manifest() -> ApplicationManifest {
        ApplicationManifest {
            profiles: vec![],
            app_package: PackageLocator { name: "A".into(), version: "2".into() },
            runtime_package: PackageLocator { name: "runtime".into(), version: "2".into() },
            dependencies: vec![],
            optional_components: vec![],
            resource_manifests: vec![],
            installer_hook: None,
            decrypt_hook: None,
        }
    }

    #[test]
    fn shutdown_completes_before_any_upgrade_starts() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers);
        for upgrade_child in plan.find(&PhaseId::new("/etcd/upgrade")).unwrap().children.iter() {
            assert_eq!(upgrade_child.requires, vec![PhaseId::new("/etcd/shutdown")]);
        }
    }

    #[test]
    fn restore_runs_once_on_the_leader() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers.clone());
        let restore = plan.find(&PhaseId::new("/etcd/restore")).unwrap();
        assert!(restore.is_leaf());
        let leader = canonical_master(&servers).unwrap();
        assert_eq!(restore.data.target_server.as_ref().unwrap().hostname, leader.hostname);
    }

    #[test]
    fn restore_carries_the_leaders_backup_path() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers.clone());
        let restore = plan.find(&PhaseId::new("/etcd/restore")).unwrap();
        let leader = canonical_master(&servers).unwrap();
        assert_eq!(restore.data.backup_path.as_deref(), Some(format!("{}/etcd-backup.tar", leader.state_dir).as_str()));
    }

    #[test]
    fn leader_restart_completes_before_other_masters_start() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers.clone());
        let leader = canonical_master(&servers).unwrap();
        let leader_restart_id = PhaseId::new(format!("/etcd/restart/{}", leader.hostname));
        let restart_root = plan.find(&PhaseId::new("/etcd/restart")).unwrap();
        let other_master_restart = restart_root
            .children
            .iter()
            .find(|p| p.id != leader_restart_id && p.id.as_str().starts_with("/etcd/restart/m"))
            .unwrap();
        assert!(other_master_restart.requires.contains(&leader_restart_id));
    }

    #[test]
    fn plan_structure_validates() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers);
        plan.validate_structure().unwrap();
    }

    #[test]
    fn upgrade_is_tagged_as_update_operation() {
        let servers = sample_servers();
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), servers);
        assert_eq!(plan.operation_type, OperationType::Update);
        assert_eq!(plan.servers.iter().filter(|s| s.cluster_role == ClusterRole::Master).count(), 3);
    }
}
