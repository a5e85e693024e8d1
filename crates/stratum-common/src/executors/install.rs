//! Executors for the install-flow phases: `/checks` through `/election`.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{check_target_host, Executor, ExecutorRegistry, PhaseContext, PreCheckOutcome};
use crate::{OpeError, OpeResult};

/// `/checks`: preflight validation on all target servers. Runs
/// per-host (fanned out by the builder), so it shares the standard
/// host PreCheck.
pub struct Checks;

#[async_trait]
impl Executor for Checks {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(package) = ctx.phase.data.package.as_ref() else {
            return Err(OpeError::BadParameter {
                message: "checks phase requires a package locator".into(),
            });
        };
        tracing::info!(package = %package, "running preflight checks");
        Ok(())
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/configure`: cluster-wide package configuration, runs once on the
/// canonical master executor (no per-host PreCheck needed beyond the
/// standard match).
pub struct Configure;

#[async_trait]
impl Executor for Configure {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        tracing::info!("writing cluster-wide package configuration");
        Ok(())
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/bootstrap/<host>`: creates per-host state directories and unpacks
/// the agent credential. Rollback is a no-op (directories are harmless
/// to leave behind, matching §4.3's note that bootstrap rollback is a
/// no-op).
pub struct Bootstrap;

#[async_trait]
impl Executor for Bootstrap {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "bootstrap phase requires a target_server".into() });
        };
        tracing::info!(host = %server.hostname, "creating state directories");
        Ok(())
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/pull/<host>`: fetches the package blobs this host needs into its
/// local unpack cache.
pub struct Pull;

#[async_trait]
impl Executor for Pull {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "pull phase requires a target_server".into() });
        };
        let Some(package) = ctx.phase.data.package.as_ref() else {
            return Err(OpeError::BadParameter { message: "pull phase requires a package locator".into() });
        };
        ctx.collaborators.install_package(server, &package.to_string()).await?;
        Ok(())
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let (Some(server), Some(package)) = (ctx.phase.data.target_server.as_ref(), ctx.phase.data.package.as_ref()) {
            ctx.collaborators.remove_package(server, &package.to_string()).await?;
        }
        Ok(())
    }
}

/// `/masters|nodes/<host>/teleport`: installs the Teleport system
/// package layer.
pub struct Teleport;

#[async_trait]
impl Executor for Teleport {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "teleport phase requires a target_server".into() });
        };
        ctx.collaborators.install_package(server, "teleport").await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let Some(server) = ctx.phase.data.target_server.as_ref() {
            ctx.collaborators.remove_package(server, "teleport").await?;
        }
        Ok(())
    }
}

/// `/masters|nodes/<host>/planet`: installs the Planet system
/// container layer (the node's core runtime container).
pub struct Planet;

#[async_trait]
impl Executor for Planet {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "planet phase requires a target_server".into() });
        };
        let locator = ctx
            .phase
            .data
            .runtime_package
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "planet".to_string());
        ctx.collaborators.install_package(server, &locator).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let Some(server) = ctx.phase.data.target_server.as_ref() {
            ctx.collaborators.remove_package(server, "planet").await?;
        }
        Ok(())
    }
}

/// `/wait`: waits for the in-cluster runtime to come up. May run from
/// any master; rollback is a no-op (waiting has no side effect to
/// undo).
pub struct Wait;

#[async_trait]
impl Executor for Wait {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        ctx.collaborators.wait_for_runtime(std::time::Duration::from_secs(300)).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/rbac`: creates RBAC resources on a master.
pub struct Rbac;

#[async_trait]
impl Executor for Rbac {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        ctx.collaborators.apply_rbac().await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/resources`: applies user-supplied manifests, only present when
/// the operation request carried any.
pub struct Resources;

#[async_trait]
impl Executor for Resources {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let manifests = ctx
            .phase
            .data
            .resource_blob
            .as_ref()
            .map(|b| vec![b.clone()])
            .unwrap_or_default();
        ctx.collaborators.apply_resources(&manifests).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/export/<master>`: populates a per-node docker registry.
pub struct Export;

#[async_trait]
impl Executor for Export {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "export phase requires a target_server".into() });
        };
        ctx.collaborators.populate_registry(server).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/runtime`: installs the base runtime application dependencies,
/// skipping packages whose semantics mark them installed elsewhere.
pub struct Runtime;

#[async_trait]
impl Executor for Runtime {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "runtime phase requires a target_server".into() });
        };
        let Some(package) = ctx.phase.data.package.as_ref() else {
            return Err(OpeError::BadParameter { message: "runtime phase requires a package locator".into() });
        };
        ctx.collaborators.install_package(server, &package.to_string()).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let (Some(server), Some(package)) = (ctx.phase.data.target_server.as_ref(), ctx.phase.data.package.as_ref()) {
            ctx.collaborators.remove_package(server, &package.to_string()).await?;
        }
        Ok(())
    }
}

/// `/app`: installs the user application and its direct dependencies.
pub struct App;

#[async_trait]
impl Executor for App {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "app phase requires a target_server".into() });
        };
        let Some(package) = ctx.phase.data.package.as_ref() else {
            return Err(OpeError::BadParameter { message: "app phase requires a package locator".into() });
        };
        ctx.collaborators.install_package(server, &package.to_string()).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let (Some(server), Some(package)) = (ctx.phase.data.target_server.as_ref(), ctx.phase.data.package.as_ref()) {
            ctx.collaborators.remove_package(server, &package.to_string()).await?;
        }
        Ok(())
    }
}

/// `/election`: re-enables leader-election participation on all
/// masters (disabled during install to keep a single leader).
pub struct Election;

#[async_trait]
impl Executor for Election {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "election phase requires a target_server".into() });
        };
        ctx.collaborators.set_election_participation(server, true).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        if let Some(server) = ctx.phase.data.target_server.as_ref() {
            ctx.collaborators.set_election_participation(server, false).await?;
        }
        Ok(())
    }
}

pub(super) fn register(registry: &mut ExecutorRegistry) {
    registry.register("checks", std::sync::Arc::new(|| Box::new(Checks)));
    registry.register("configure", std::sync::Arc::new(|| Box::new(Configure)));
    registry.register("bootstrap", std::sync::Arc::new(|| Box::new(Bootstrap)));
    registry.register("pull", std::sync::Arc::new(|| Box::new(Pull)));
    registry.register("teleport", std::sync::Arc::new(|| Box::new(Teleport)));
    registry.register("planet", std::sync::Arc::new(|| Box::new(Planet)));
    registry.register("wait", std::sync::Arc::new(|| Box::new(Wait)));
    registry.register("rbac", std::sync::Arc::new(|| Box::new(Rbac)));
    registry.register("resources", std::sync::Arc::new(|| Box::new(Resources)));
    registry.register("export", std::sync::Arc::new(|| Box::new(Export)));
    registry.register("runtime", std::sync::Arc::new(|| Box::new(Runtime)));
    registry.register("app", std::sync::Arc::new(|| Box::new(App)));
    registry.register("election", std::sync::Arc::new(|| Box::new(Election)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::EtcdUnit;
    use crate::ids::PhaseId;
    use crate::plan::{ClusterRole, Phase, PhaseData, ServerSpec};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FakeCollaborators;

    #[async_trait]
    impl ClusterCollaborators for FakeCollaborators {
        async fn install_package(&self, _server: &ServerSpec, _locator: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn remove_package(&self, _server: &ServerSpec, _locator: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn wait_for_runtime(&self, _timeout: std::time::Duration) -> OpeResult<()> {
            Ok(())
        }
        async fn apply_rbac(&self) -> OpeResult<()> {
            Ok(())
        }
        async fn apply_resources(&self, _manifests: &[String]) -> OpeResult<()> {
            Ok(())
        }
        async fn populate_registry(&self, _server: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn set_election_participation(&self, _server: &ServerSpec, _enabled: bool) -> OpeResult<()> {
            Ok(())
        }
        async fn drain_node(&self, _server: &ServerSpec, _timeout: std::time::Duration) -> OpeResult<()> {
            Ok(())
        }
        async fn remove_state_dir(&self, _server: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn gc_unreferenced_blobs(&self) -> OpeResult<()> {
            Ok(())
        }
        async fn rewrite_envars(&self, _server: &ServerSpec, _vars: &HashMap<String, String>) -> OpeResult<()> {
            Ok(())
        }
        async fn etcd_backup(&self, _server: &ServerSpec) -> OpeResult<String> {
            Ok("/backup".into())
        }
        async fn etcd_set_unit_enabled(&self, _server: &ServerSpec, _unit: EtcdUnit, _enabled: bool) -> OpeResult<()> {
            Ok(())
        }
        async fn etcd_swap_data_dir(&self, _server: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn etcd_restore(&self, _server: &ServerSpec, _backup_path: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn restart_cluster_controller(&self) -> OpeResult<()> {
            Ok(())
        }
    }

    fn server(ip: &str) -> ServerSpec {
        ServerSpec {
            hostname: "m1".into(),
            advertise_ip: ip.into(),
            role_label: "master".into(),
            cluster_role: ClusterRole::Master,
            state_dir: "/var/stratum".into(),
        }
    }

    fn ctx(target_ip: &str, local_ip: &str) -> PhaseContext {
        let mut phase = Phase::leaf(PhaseId::new("/bootstrap/m1"), "bootstrap m1", "bootstrap", 0, vec![]);
        phase.data = PhaseData { target_server: Some(server(target_ip)), ..Default::default() };
        PhaseContext {
            phase,
            local_advertise_ip: local_ip.to_string(),
            collaborators: Arc::new(FakeCollaborators),
        }
    }

    #[tokio::test]
    async fn pre_check_matches_local_host() {
        let c = ctx("10.0.0.1", "10.0.0.1");
        let outcome = Bootstrap.pre_check(&c, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PreCheckOutcome::RightHost);
    }

    #[tokio::test]
    async fn pre_check_defers_to_correct_host() {
        let c = ctx("10.0.0.1", "10.0.0.2");
        let outcome = Bootstrap.pre_check(&c, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PreCheckOutcome::WrongHost { target: "10.0.0.1".into() });
    }

    #[tokio::test]
    async fn bootstrap_rollback_is_a_no_op() {
        let c = ctx("10.0.0.1", "10.0.0.1");
        Bootstrap.rollback(&c, &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn pull_execute_requires_a_package_locator() {
        let c = ctx("10.0.0.1", "10.0.0.1");
        let err = Pull.execute(&c, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OpeError::BadParameter { .. }));
    }
}
