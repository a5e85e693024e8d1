//! The canonical install builder (§4.2). `expand` reuses
//! [`build_host_subtree`] and [`build_bootstrap`] scoped to only the
//! joining servers; `upgrade` splices the etcd subplan from
//! [`crate::builder::upgrade`] between system package updates and the
//! controller restart.

use chrono::Utc;
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::plan::{
    ClusterRole, DnsConfig, ElectionChange, OperationType, Phase, PhaseData, Plan, ServerSpec,
};

use crate::builder::{agent_credential, canonical_master, classify_servers, masters, nodes, service_user};
use crate::manifest::ApplicationManifest;

pub fn build(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    manifest: &ApplicationManifest,
    max_masters: usize,
) -> Plan {
    let servers = classify_servers(&manifest.profiles, max_masters);
    let mut roots = Vec::new();
    let mut step = 0u32;

    roots.push(checks_phase(&manifest, step));
    step += 1;

    let mut configure_requires = Vec::new();
    if let Some(hook) = &manifest.installer_hook {
        roots.push(Phase::leaf(PhaseId::root("installer"), hook, "installer", step, vec![]));
        configure_requires.push(PhaseId::root("installer"));
        step += 1;
    }
    if let Some(hook) = &manifest.decrypt_hook {
        roots.push(Phase::leaf(PhaseId::root("decrypt"), hook, "decrypt", step, vec![]));
        configure_requires.push(PhaseId::root("decrypt"));
        step += 1;
    }
    roots.push(Phase::leaf(PhaseId::root("configure"), "configure package", "configure", step, configure_requires));
    step += 1;

    roots.push(build_bootstrap(&servers, step));
    step += 1;

    roots.push(build_pull(&servers, manifest, step));
    step += 1;

    roots.push(build_host_subtree(PhaseId::root("masters"), &masters(&servers), manifest, step));
    step += 1;
    roots.push(build_host_subtree(PhaseId::root("nodes"), &nodes(&servers), manifest, step));
    step += 1;

    let wait_id = PhaseId::root("wait");
    roots.push(Phase::leaf(wait_id.clone(), "wait for runtime", "wait", step, vec![PhaseId::root("masters"), PhaseId::root("nodes")]));
    step += 1;

    let rbac_id = PhaseId::root("rbac");
    roots.push(
        Phase::leaf(rbac_id.clone(), "create rbac", "rbac", step, vec![wait_id.clone()])
            .with_data(PhaseData { target_server: canonical_master(&servers).cloned(), ..Default::default() }),
    );
    step += 1;

    let mut after_rbac = rbac_id.clone();
    if !manifest.resource_manifests.is_empty() {
        let resources_id = PhaseId::root("resources");
        let blob = manifest.resource_manifests.join("\n---\n");
        roots.push(
            Phase::leaf(resources_id.clone(), "apply user resources", "resources", step, vec![rbac_id.clone()])
                .with_data(PhaseData { resource_blob: Some(blob), ..Default::default() }),
        );
        after_rbac = resources_id;
        step += 1;
    }

    roots.push(build_export(&servers, &after_rbac, step));
    step += 1;

    let runtime_id = PhaseId::root("runtime");
    roots.push(build_runtime(&servers, manifest, &PhaseId::root("export"), step));
    step += 1;

    let app_id = PhaseId::root("app");
    roots.push(
        Phase::leaf(app_id.clone(), "install application", "app", step, vec![runtime_id.clone()]).with_data(PhaseData {
            target_server: canonical_master(&servers).cloned(),
            package: Some(manifest.app_package.clone()),
            ..Default::default()
        }),
    );
    step += 1;

    let election = ElectionChange { enable: masters(&servers).iter().map(|s| s.hostname.clone()).collect(), disable: vec![] };
    roots.push(
        Phase::composite(PhaseId::root("election"), "enable leader election", step, true, election_children(&servers, &app_id))
            .with_data(PhaseData { election_change: Some(election), ..Default::default() }),
    );

    Plan {
        op_id,
        cluster,
        account_id: account_id.to_string(),
        operation_type: OperationType::Install,
        created_ts: Utc::now(),
        roots,
        dns_config: DnsConfig::default(),
        servers,
        runtime_package: manifest.runtime_package.clone(),
    }
}

fn checks_phase(manifest: &ApplicationManifest, step: u32) -> Phase {
    Phase::leaf(PhaseId::root("checks"), "preflight checks", "checks", step, vec![])
        .with_data(PhaseData { package: Some(manifest.app_package.clone()), ..Default::default() })
}

/// `/bootstrap`: one child per server, parallel, no requirements.
pub fn build_bootstrap(servers: &[ServerSpec], step: u32) -> Phase {
    let children = servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            let is_master = server.cluster_role == ClusterRole::Master;
            Phase::leaf(PhaseId::root("bootstrap").child(&server.hostname), &format!("bootstrap {}", server.hostname), "bootstrap", i as u32, vec![])
                .with_data(PhaseData {
                    target_server: Some(server.clone()),
                    agent_credential: Some(agent_credential(is_master)),
                    service_user: Some(service_user()),
                    ..Default::default()
                })
        })
        .collect();
    Phase::composite(PhaseId::root("bootstrap"), "bootstrap hosts", step, true, children)
}

/// `/pull`: per-server parallel fan-out, each requiring `/configure`
/// and the whole `/bootstrap` composite (not its individual child, per
/// the literal scenario in §8).
pub fn build_pull(servers: &[ServerSpec], manifest: &ApplicationManifest, step: u32) -> Phase {
    let children = servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(
                PhaseId::root("pull").child(&server.hostname),
                &format!("pull packages for {}", server.hostname),
                "pull",
                i as u32,
                vec![PhaseId::root("configure"), PhaseId::root("bootstrap")],
            )
            .with_data(PhaseData {
                target_server: Some(server.clone()),
                package: Some(manifest.runtime_package.clone()),
                ..Default::default()
            })
        })
        .collect();
    Phase::composite(PhaseId::root("pull"), "pull packages", step, true, children)
}

/// Builds `/masters` or `/nodes`: a parallel composite of per-host
/// subtrees, each a non-parallel `teleport` then `planet` pair
/// requiring the matching `/pull/<host>`.
pub fn build_host_subtree(root_id: PhaseId, servers: &[&ServerSpec], manifest: &ApplicationManifest, step: u32) -> Phase {
    let children = servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            let pull_id = PhaseId::root("pull").child(&server.hostname);
            let host_root = root_id.child(&server.hostname);
            let teleport = Phase::leaf(host_root.child("teleport"), "install teleport", "teleport", 0, vec![pull_id.clone()])
                .with_data(PhaseData { target_server: Some((*server).clone()), ..Default::default() });
            let planet = Phase::leaf(host_root.child("planet"), "install planet", "planet", 1, vec![pull_id])
                .with_data(PhaseData {
                    target_server: Some((*server).clone()),
                    runtime_package: Some(manifest.runtime_package.clone()),
                    ..Default::default()
                });
            Phase::composite(host_root, &format!("provision {}", server.hostname), i as u32, false, vec![teleport, planet])
        })
        .collect();
    Phase::composite(root_id, "provision host layer", step, true, children)
}

/// `/export`: per-master parallel fan-out populating docker registries.
pub fn build_export(servers: &[ServerSpec], requires: &PhaseId, step: u32) -> Phase {
    let children = masters(servers)
        .into_iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(
                PhaseId::root("export").child(&server.hostname),
                &format!("populate registry on {}", server.hostname),
                "export",
                i as u32,
                vec![requires.clone()],
            )
            .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect();
    Phase::composite(PhaseId::root("export"), "export registries", step, true, children)
}

/// `/runtime`: one child per base runtime dependency package, fanned
/// out onto the canonical master. Per §4.2 point 10, the app package
/// itself (already handled by `/configure`) and any optional
/// component not enabled by the manifest are skipped.
pub fn build_runtime(servers: &[ServerSpec], manifest: &ApplicationManifest, requires: &PhaseId, step: u32) -> Phase {
    let target = canonical_master(servers).cloned();
    let packages = std::iter::once(manifest.runtime_package.clone()).chain(runtime_dependencies(manifest));

    let children = packages
        .enumerate()
        .map(|(i, package)| {
            let segment = package.name.replace('/', "-");
            Phase::leaf(
                PhaseId::root("runtime").child(&segment),
                &format!("install {}", package.name),
                "runtime",
                i as u32,
                vec![requires.clone()],
            )
            .with_data(PhaseData { target_server: target.clone(), package: Some(package), ..Default::default() })
        })
        .collect();
    Phase::composite(PhaseId::root("runtime"), "install runtime dependencies", step, true, children)
}

/// Dependency packages the `/runtime` fan-out actually installs: the
/// app package is configured separately by `/configure`/`/app`, and an
/// optional component is only installed when its name is named in
/// `optional_components`.
fn runtime_dependencies(manifest: &ApplicationManifest) -> impl Iterator<Item = stratum_common::plan::PackageLocator> + '_ {
    manifest
        .dependencies
        .iter()
        .filter(|dep| dep.name != manifest.app_package.name)
        .filter(|dep| !is_optional_component(&dep.name) || manifest.optional_components.iter().any(|c| c == &dep.name))
        .cloned()
}

/// Dependency names under `optional/` are optional components; every
/// other dependency is mandatory.
fn is_optional_component(name: &str) -> bool {
    name.starts_with("optional/")
}

fn election_children(servers: &[ServerSpec], requires: &PhaseId) -> Vec<Phase> {
    masters(servers)
        .into_iter()
        .enumerate()
        .map(|(i, server)| {
            Phase::leaf(
                PhaseId::root("election").child(&server.hostname),
                &format!("enable election on {}", server.hostname),
                "election",
                i as u32,
                vec![requires.clone()],
            )
            .with_data(PhaseData { target_server: Some(server.clone()), ..Default::default() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{NodeProfile, ProfileRole};
    use stratum_common::plan::PackageLocator;

    fn sample_manifest() -> ApplicationManifest {
        ApplicationManifest {
            profiles: vec![
                NodeProfile { hostname: "m1".into(), advertise_ip: "10.10.0.1".into(), role: ProfileRole::Master },
                NodeProfile { hostname: "n1".into(), advertise_ip: "10.10.0.2".into(), role: ProfileRole::Node },
            ],
            app_package: PackageLocator { name: "A".into(), version: "1".into() },
            runtime_package: PackageLocator { name: "runtime".into(), version: "1".into() },
            dependencies: vec![],
            optional_components: vec![],
            resource_manifests: vec![],
            installer_hook: None,
            decrypt_hook: None,
        }
    }

    fn build_plan() -> Plan {
        build(OperationId::new(), ClusterName::new("c1"), "acct", &sample_manifest(), 3)
    }

    #[test]
    fn minimal_install_plan_has_the_expected_root_order() {
        let plan = build_plan();
        let ids: Vec<_> = plan.roots.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "/checks", "/configure", "/bootstrap", "/pull", "/masters", "/nodes", "/wait",
                "/rbac", "/export", "/runtime", "/app", "/election",
            ]
        );
    }

    #[test]
    fn bootstrap_has_two_parallel_children_with_no_requirements() {
        let plan = build_plan();
        let bootstrap = plan.find(&PhaseId::root("bootstrap")).unwrap();
        assert!(bootstrap.parallel);
        assert_eq!(bootstrap.children.len(), 2);
        for child in &bootstrap.children {
            assert!(child.requires.is_empty());
        }
    }

    #[test]
    fn pull_m1_requires_configure_and_bootstrap() {
        let plan = build_plan();
        let pull_m1 = plan.find(&PhaseId::new("/pull/m1")).unwrap();
        assert_eq!(pull_m1.requires, vec![PhaseId::root("configure"), PhaseId::root("bootstrap")]);
    }

    #[test]
    fn masters_m1_planet_requires_pull_m1() {
        let plan = build_plan();
        let planet = plan.find(&PhaseId::new("/masters/m1/planet")).unwrap();
        assert_eq!(planet.requires, vec![PhaseId::new("/pull/m1")]);
    }

    #[test]
    fn election_requires_app() {
        let plan = build_plan();
        let election = plan.find(&PhaseId::root("election")).unwrap();
        for child in &election.children {
            assert_eq!(child.requires, vec![PhaseId::root("app")]);
        }
    }

    #[test]
    fn plan_structure_validates() {
        let plan = build_plan();
        plan.validate_structure().unwrap();
    }

    #[test]
    fn fourth_requested_master_is_demoted_and_still_gets_a_pull_phase() {
        let mut manifest = sample_manifest();
        manifest.profiles = vec![
            NodeProfile { hostname: "h1".into(), advertise_ip: "10.0.0.1".into(), role: ProfileRole::Master },
            NodeProfile { hostname: "h2".into(), advertise_ip: "10.0.0.2".into(), role: ProfileRole::Master },
            NodeProfile { hostname: "h3".into(), advertise_ip: "10.0.0.3".into(), role: ProfileRole::Master },
            NodeProfile { hostname: "h4".into(), advertise_ip: "10.0.0.4".into(), role: ProfileRole::Master },
        ];
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest, 3);
        let roles: Vec<_> = plan.servers.iter().map(|s| s.cluster_role).collect();
        assert_eq!(roles, vec![ClusterRole::Master, ClusterRole::Master, ClusterRole::Master, ClusterRole::Node]);
        assert!(plan.find(&PhaseId::new("/pull/h4")).is_some());
        assert!(plan.find(&PhaseId::new("/nodes/h4")).is_some());
    }

    #[test]
    fn runtime_installs_the_runtime_package_and_mandatory_dependencies() {
        let mut manifest = sample_manifest();
        manifest.dependencies = vec![PackageLocator { name: "cni".into(), version: "1".into() }];
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest, 3);
        let runtime = plan.find(&PhaseId::root("runtime")).unwrap();
        let names: Vec<_> = runtime.children.iter().map(|c| c.data.package.as_ref().unwrap().name.clone()).collect();
        assert_eq!(names, vec!["runtime".to_string(), "cni".to_string()]);
    }

    #[test]
    fn runtime_skips_the_app_package_and_disabled_optional_components() {
        let mut manifest = sample_manifest();
        manifest.dependencies = vec![
            PackageLocator { name: "A".into(), version: "1".into() },
            PackageLocator { name: "optional/dashboard".into(), version: "1".into() },
        ];
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest, 3);
        let runtime = plan.find(&PhaseId::root("runtime")).unwrap();
        let names: Vec<_> = runtime.children.iter().map(|c| c.data.package.as_ref().unwrap().name.clone()).collect();
        assert_eq!(names, vec!["runtime".to_string()]);
    }

    #[test]
    fn runtime_installs_an_enabled_optional_component() {
        let mut manifest = sample_manifest();
        manifest.dependencies = vec![PackageLocator { name: "optional/dashboard".into(), version: "1".into() }];
        manifest.optional_components = vec!["optional/dashboard".into()];
        let plan = build(OperationId::new(), ClusterName::new("c1"), "acct", &manifest, 3);
        let runtime = plan.find(&PhaseId::root("runtime")).unwrap();
        let names: Vec<_> = runtime.children.iter().map(|c| c.data.package.as_ref().unwrap().name.clone()).collect();
        assert_eq!(names, vec!["runtime".to_string(), "optional/dashboard".to_string()]);
    }
}
