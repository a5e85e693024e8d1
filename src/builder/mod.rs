//! The plan builder (C2): compiles an operation request plus an
//! application manifest into a phase DAG. Shared helpers live here;
//! each [`stratum_common::plan::OperationType`] has its own submodule.

pub mod expand;
pub mod gc;
pub mod install;
pub mod shrink;
pub mod uninstall;
pub mod update_envars;
pub mod upgrade;

use stratum_common::plan::{AgentCredential, ClusterRole, ServerSpec, ServiceUser};

use crate::manifest::{NodeProfile, ProfileRole};

/// Tags each profile-supplied server as master until `max_masters`
/// masters have been accumulated; surplus profile-masters are demoted
/// to node. Profile role `node` is never promoted. Order is preserved.
pub fn classify_servers(profiles: &[NodeProfile], max_masters: usize) -> Vec<ServerSpec> {
    let mut masters_seen = 0usize;
    profiles
        .iter()
        .map(|profile| {
            let cluster_role = match profile.role {
                ProfileRole::Node => ClusterRole::Node,
                ProfileRole::Master if masters_seen < max_masters => {
                    masters_seen += 1;
                    ClusterRole::Master
                }
                ProfileRole::Master => ClusterRole::Node,
            };
            let role_label = match cluster_role {
                ClusterRole::Master => "master",
                ClusterRole::Node => "node",
            };
            ServerSpec {
                hostname: profile.hostname.clone(),
                advertise_ip: profile.advertise_ip.clone(),
                role_label: role_label.to_string(),
                cluster_role,
                state_dir: format!("/var/lib/stratum/{}", profile.hostname),
            }
        })
        .collect()
}

pub fn service_user() -> ServiceUser {
    ServiceUser { name: "stratum".to_string(), uid: 1000, gid: 1000 }
}

/// A fresh provisioning token for one server's agent; masters receive
/// an admin-scoped credential, nodes a regular one.
pub fn agent_credential(admin: bool) -> AgentCredential {
    AgentCredential { token: uuid::Uuid::new_v4().to_string(), admin }
}

pub fn masters(servers: &[ServerSpec]) -> Vec<&ServerSpec> {
    servers.iter().filter(|s| s.cluster_role == ClusterRole::Master).collect()
}

pub fn nodes(servers: &[ServerSpec]) -> Vec<&ServerSpec> {
    servers.iter().filter(|s| s.cluster_role == ClusterRole::Node).collect()
}

/// The canonical single-master executor for phases with exactly one
/// driver: the first master in the ordered server list.
pub fn canonical_master(servers: &[ServerSpec]) -> Option<&ServerSpec> {
    masters(servers).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(hostname: &str, role: ProfileRole) -> NodeProfile {
        NodeProfile { hostname: hostname.to_string(), advertise_ip: format!("10.0.0.{}", hostname.len()), role }
    }

    #[test]
    fn surplus_profile_masters_are_demoted_in_order() {
        let profiles = vec![
            profile("a", ProfileRole::Master),
            profile("bb", ProfileRole::Master),
            profile("ccc", ProfileRole::Master),
            profile("dddd", ProfileRole::Master),
        ];
        let servers = classify_servers(&profiles, 3);
        let roles: Vec<_> = servers.iter().map(|s| s.cluster_role).collect();
        assert_eq!(roles, vec![ClusterRole::Master, ClusterRole::Master, ClusterRole::Master, ClusterRole::Node]);
        assert_eq!(servers[3].hostname, "dddd");
    }

    #[test]
    fn profile_node_is_never_promoted() {
        let profiles = vec![profile("a", ProfileRole::Node)];
        let servers = classify_servers(&profiles, 3);
        assert_eq!(servers[0].cluster_role, ClusterRole::Node);
    }
}
