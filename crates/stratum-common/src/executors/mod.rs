//! The phase executor contract and registry (C3).
//!
//! Every leaf phase names an `executor_key`; the registry maps that
//! key to a factory producing a boxed [`Executor`]. The four-operation
//! contract (PreCheck/Execute/Rollback/PostCheck) replaces the
//! interface-based dispatch a statically-typed host language would use
//! for this — see the design notes on polymorphic executors.

mod etcd;
mod install;
mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::plan::{Phase, ServerSpec};
use crate::OpeResult;

/// Outcome of [`Executor::pre_check`]: distinguishes "this phase
/// belongs to a different host" (defer dispatch) from "the host could
/// not be determined" (a genuine failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreCheckOutcome {
    RightHost,
    WrongHost { target: String },
    CannotCheck { reason: String },
}

/// The effectful operations a phase executor calls into: package
/// install/removal, the in-cluster runtime, RBAC, registries and the
/// etcd-class store. These are the "external collaborators" out of
/// scope per the purpose & scope section — executors only ever see
/// this trait, never a concrete container runtime or package-store
/// client.
#[async_trait]
pub trait ClusterCollaborators: Send + Sync {
    async fn install_package(&self, server: &ServerSpec, locator: &str) -> OpeResult<()>;
    async fn remove_package(&self, server: &ServerSpec, locator: &str) -> OpeResult<()>;
    async fn wait_for_runtime(&self, timeout: std::time::Duration) -> OpeResult<()>;
    async fn apply_rbac(&self) -> OpeResult<()>;
    async fn apply_resources(&self, manifests: &[String]) -> OpeResult<()>;
    async fn populate_registry(&self, server: &ServerSpec) -> OpeResult<()>;
    async fn set_election_participation(&self, server: &ServerSpec, enabled: bool) -> OpeResult<()>;
    async fn drain_node(&self, server: &ServerSpec, timeout: std::time::Duration) -> OpeResult<()>;
    async fn remove_state_dir(&self, server: &ServerSpec) -> OpeResult<()>;
    async fn gc_unreferenced_blobs(&self) -> OpeResult<()>;
    async fn rewrite_envars(&self, server: &ServerSpec, vars: &HashMap<String, String>) -> OpeResult<()>;
    async fn etcd_backup(&self, server: &ServerSpec) -> OpeResult<String>;
    async fn etcd_set_unit_enabled(&self, server: &ServerSpec, unit: EtcdUnit, enabled: bool) -> OpeResult<()>;
    async fn etcd_swap_data_dir(&self, server: &ServerSpec) -> OpeResult<()>;
    async fn etcd_restore(&self, server: &ServerSpec, backup_path: &str) -> OpeResult<()>;
    async fn restart_cluster_controller(&self) -> OpeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdUnit {
    /// The regular, client-serving store unit.
    Main,
    /// The alternative-address unit used during the migration window.
    Upgrade,
}

/// Per-invocation context passed to every executor operation.
#[derive(Clone)]
pub struct PhaseContext {
    pub phase: Phase,
    pub local_advertise_ip: String,
    pub collaborators: Arc<dyn ClusterCollaborators>,
}

/// The four-operation executor contract (§4.3). All operations accept
/// a [`CancellationToken`] honoring the suspension-point rule in §5.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn pre_check(&self, ctx: &PhaseContext, cancel: &CancellationToken) -> OpeResult<PreCheckOutcome>;
    async fn execute(&self, ctx: &PhaseContext, cancel: &CancellationToken) -> OpeResult<()>;
    async fn rollback(&self, ctx: &PhaseContext, cancel: &CancellationToken) -> OpeResult<()>;
    async fn post_check(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// Matches `phase.data.target_server.advertise_ip` (falling back to
/// `executing_server`) against the local node's advertise ip — the
/// PreCheck every per-host executor shares.
pub(crate) fn check_target_host(ctx: &PhaseContext) -> PreCheckOutcome {
    let target = ctx
        .phase
        .data
        .target_server
        .as_ref()
        .or(ctx.phase.data.executing_server.as_ref());
    match target {
        None => PreCheckOutcome::CannotCheck {
            reason: "phase has no target_server or executing_server".into(),
        },
        Some(server) if server.advertise_ip == ctx.local_advertise_ip => PreCheckOutcome::RightHost,
        Some(server) => PreCheckOutcome::WrongHost {
            target: server.advertise_ip.clone(),
        },
    }
}

pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Maps executor keys to factories. Built once at operator/agent
/// startup via [`ExecutorRegistry::standard`].
pub struct ExecutorRegistry {
    factories: HashMap<&'static str, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register(&mut self, key: &'static str, factory: ExecutorFactory) {
        self.factories.insert(key, factory);
    }

    pub fn build(&self, key: &str) -> Option<Box<dyn Executor>> {
        self.factories.get(key).map(|f| f())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// The full registry of executors this crate knows how to build:
    /// the install-flow executors, the seven-stage etcd upgrade
    /// executors, and the shrink/uninstall/gc/update-envars executors.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        install::register(&mut registry);
        etcd::register(&mut registry);
        lifecycle::register(&mut registry);
        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
