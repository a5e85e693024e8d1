//! Executors for shrink, uninstall, gc and update-envars operations.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{check_target_host, Executor, ExecutorRegistry, PhaseContext, PreCheckOutcome};
use crate::{OpeError, OpeResult};

/// `/drain/<host>`: cordons and drains a node before it is removed
/// from the cluster (shrink operations). Draining has no rollback: a
/// node already evicted does not go back to hosting workloads just
/// because a later phase failed.
pub struct Drain;

#[async_trait]
impl Executor for Drain {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "drain phase requires a target_server".into() });
        };
        ctx.collaborators.drain_node(server, std::time::Duration::from_secs(120)).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/uninstall/<host>`: removes a host's state directory and
/// installed packages (uninstall operations and the tail end of
/// shrink). No-op rollback, matching drain.
pub struct UninstallHost;

#[async_trait]
impl Executor for UninstallHost {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "uninstall-host phase requires a target_server".into() });
        };
        if let Some(package) = ctx.phase.data.installed_package.as_ref() {
            ctx.collaborators.remove_package(server, &package.to_string()).await?;
        }
        ctx.collaborators.remove_state_dir(server).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/gc`: reclaims package blobs no longer referenced by any
/// installed host. Runs once, from any master.
pub struct Gc;

#[async_trait]
impl Executor for Gc {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        ctx.collaborators.gc_unreferenced_blobs().await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/update-envars/<host>`: rewrites per-host runtime environment
/// variables without reinstalling packages. No-op rollback: the prior
/// values aren't carried, matching the no-op rollback rule for
/// in-place config rewrites.
pub struct UpdateEnvars;

#[async_trait]
impl Executor for UpdateEnvars {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "update-envars phase requires a target_server".into() });
        };
        ctx.collaborators.rewrite_envars(server, &ctx.phase.data.labels).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

pub(super) fn register(registry: &mut ExecutorRegistry) {
    registry.register("drain", std::sync::Arc::new(|| Box::new(Drain)));
    registry.register("uninstall-host", std::sync::Arc::new(|| Box::new(UninstallHost)));
    registry.register("gc", std::sync::Arc::new(|| Box::new(Gc)));
    registry.register("update-envars", std::sync::Arc::new(|| Box::new(UpdateEnvars)));
}
