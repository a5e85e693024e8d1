//! Executors for the etcd-class store upgrade stages (§4.8).
//!
//! Each stage runs once per master, in order, and only the leader
//! triggers the cluster-controller restart on shutdown. Rollback
//! follows the table in §4.8: backup/restore/restart/controller-restart
//! are no-ops to roll back; shutdown re-enables the unit it disabled;
//! upgrade reverts the swapped data directory and restarts the old
//! unit.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{check_target_host, EtcdUnit, Executor, ExecutorRegistry, PhaseContext, PreCheckOutcome};
use crate::{OpeError, OpeResult};

/// `/masters/<host>/etcd-backup`: snapshots the local store before
/// any destructive stage runs.
pub struct EtcdBackup;

#[async_trait]
impl Executor for EtcdBackup {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-backup requires a target_server".into() });
        };
        let path = ctx.collaborators.etcd_backup(server).await?;
        tracing::info!(host = %server.hostname, backup_path = %path, "etcd backup complete");
        Ok(())
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/masters/<host>/etcd-shutdown`: disables the main store unit.
/// Rollback re-enables it; if this host is the leader, rollback also
/// triggers a cluster-controller restart so the rest of the cluster
/// notices the leader came back.
pub struct EtcdShutdown;

#[async_trait]
impl Executor for EtcdShutdown {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-shutdown requires a target_server".into() });
        };
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Main, false).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Ok(());
        };
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Main, true).await?;
        let is_leader = ctx
            .phase
            .data
            .election_change
            .as_ref()
            .is_some_and(|c| c.enable.contains(&server.hostname));
        if is_leader {
            ctx.collaborators.restart_cluster_controller().await?;
        }
        Ok(())
    }
}

/// `/masters/<host>/etcd-upgrade`: swaps the data directory to the new
/// version's layout and enables the upgrade-stage unit on the
/// alternative address. Rollback disables the upgrade unit, reverts
/// the marker by swapping the data directory back, and restarts the
/// original unit.
pub struct EtcdUpgrade;

#[async_trait]
impl Executor for EtcdUpgrade {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-upgrade requires a target_server".into() });
        };
        ctx.collaborators.etcd_swap_data_dir(server).await?;
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Upgrade, true).await
    }

    async fn rollback(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Ok(());
        };
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Upgrade, false).await?;
        ctx.collaborators.etcd_swap_data_dir(server).await?;
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Main, true).await
    }
}

/// `/masters/<host>/etcd-restore`: restores from the backup taken by
/// `etcd-backup`, used on the failure path. No-op rollback: a restore
/// that itself needs undoing means the whole operation is already
/// failing past the point of automatic recovery.
pub struct EtcdRestore;

#[async_trait]
impl Executor for EtcdRestore {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-restore requires a target_server".into() });
        };
        let Some(backup_path) = ctx.phase.data.backup_path.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-restore requires a backup path in data.backup_path".into() });
        };
        ctx.collaborators.etcd_restore(server, backup_path).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/masters/<host>/etcd-restart`: restarts the main store unit after
/// upgrade or restore. No-op rollback.
pub struct EtcdRestart;

#[async_trait]
impl Executor for EtcdRestart {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        let Some(server) = ctx.phase.data.target_server.as_ref() else {
            return Err(OpeError::BadParameter { message: "etcd-restart requires a target_server".into() });
        };
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Main, false).await?;
        ctx.collaborators.etcd_set_unit_enabled(server, EtcdUnit::Main, true).await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

/// `/masters/etcd-controller-restart`: restarts the cluster controller
/// once all masters have finished their per-host stages. No-op
/// rollback, runs from any master.
pub struct EtcdControllerRestart;

#[async_trait]
impl Executor for EtcdControllerRestart {
    async fn pre_check(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<PreCheckOutcome> {
        Ok(check_target_host(ctx))
    }

    async fn execute(&self, ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        ctx.collaborators.restart_cluster_controller().await
    }

    async fn rollback(&self, _ctx: &PhaseContext, _cancel: &CancellationToken) -> OpeResult<()> {
        Ok(())
    }
}

pub(super) fn register(registry: &mut ExecutorRegistry) {
    registry.register("etcd-backup", std::sync::Arc::new(|| Box::new(EtcdBackup)));
    registry.register("etcd-shutdown", std::sync::Arc::new(|| Box::new(EtcdShutdown)));
    registry.register("etcd-upgrade", std::sync::Arc::new(|| Box::new(EtcdUpgrade)));
    registry.register("etcd-restore", std::sync::Arc::new(|| Box::new(EtcdRestore)));
    registry.register("etcd-restart", std::sync::Arc::new(|| Box::new(EtcdRestart)));
    registry.register("etcd-controller-restart", std::sync::Arc::new(|| Box::new(EtcdControllerRestart)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ClusterCollaborators;
    use crate::ids::PhaseId;
    use crate::plan::{ClusterRole, ElectionChange, Phase, PhaseData, ServerSpec};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeCollaborators {
        unit_calls: Mutex<Vec<(EtcdUnit, bool)>>,
        controller_restarts: Mutex<u32>,
    }

    #[async_trait]
    impl ClusterCollaborators for FakeCollaborators {
        async fn install_package(&self, _s: &ServerSpec, _l: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn remove_package(&self, _s: &ServerSpec, _l: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn wait_for_runtime(&self, _t: std::time::Duration) -> OpeResult<()> {
            Ok(())
        }
        async fn apply_rbac(&self) -> OpeResult<()> {
            Ok(())
        }
        async fn apply_resources(&self, _m: &[String]) -> OpeResult<()> {
            Ok(())
        }
        async fn populate_registry(&self, _s: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn set_election_participation(&self, _s: &ServerSpec, _e: bool) -> OpeResult<()> {
            Ok(())
        }
        async fn drain_node(&self, _s: &ServerSpec, _t: std::time::Duration) -> OpeResult<()> {
            Ok(())
        }
        async fn remove_state_dir(&self, _s: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn gc_unreferenced_blobs(&self) -> OpeResult<()> {
            Ok(())
        }
        async fn rewrite_envars(&self, _s: &ServerSpec, _v: &HashMap<String, String>) -> OpeResult<()> {
            Ok(())
        }
        async fn etcd_backup(&self, _s: &ServerSpec) -> OpeResult<String> {
            Ok("/var/stratum/etcd-backup.tar".into())
        }
        async fn etcd_set_unit_enabled(&self, _s: &ServerSpec, unit: EtcdUnit, enabled: bool) -> OpeResult<()> {
            self.unit_calls.lock().unwrap().push((unit, enabled));
            Ok(())
        }
        async fn etcd_swap_data_dir(&self, _s: &ServerSpec) -> OpeResult<()> {
            Ok(())
        }
        async fn etcd_restore(&self, _s: &ServerSpec, _p: &str) -> OpeResult<()> {
            Ok(())
        }
        async fn restart_cluster_controller(&self) -> OpeResult<()> {
            *self.controller_restarts.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn server() -> ServerSpec {
        ServerSpec {
            hostname: "m1".into(),
            advertise_ip: "10.0.0.1".into(),
            role_label: "master".into(),
            cluster_role: ClusterRole::Master,
            state_dir: "/var/stratum".into(),
        }
    }

    fn ctx_with_election(leader: bool, collaborators: Arc<dyn ClusterCollaborators>) -> PhaseContext {
        let mut phase = Phase::leaf(PhaseId::new("/masters/m1/etcd-shutdown"), "shutdown", "etcd-shutdown", 0, vec![]);
        let election = if leader {
            Some(ElectionChange { enable: vec!["m1".into()], disable: vec![] })
        } else {
            None
        };
        phase.data = PhaseData { target_server: Some(server()), election_change: election, ..Default::default() };
        PhaseContext { phase, local_advertise_ip: "10.0.0.1".into(), collaborators }
    }

    #[tokio::test]
    async fn shutdown_rollback_reenables_main_unit() {
        let collab = Arc::new(FakeCollaborators::default());
        let ctx = ctx_with_election(false, collab.clone());
        EtcdShutdown.rollback(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(*collab.unit_calls.lock().unwrap(), vec![(EtcdUnit::Main, true)]);
        assert_eq!(*collab.controller_restarts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_rollback_on_leader_also_restarts_controller() {
        let collab = Arc::new(FakeCollaborators::default());
        let ctx = ctx_with_election(true, collab.clone());
        EtcdShutdown.rollback(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(*collab.controller_restarts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn upgrade_rollback_restores_main_unit() {
        let collab = Arc::new(FakeCollaborators::default());
        let ctx = ctx_with_election(false, collab.clone());
        EtcdUpgrade.rollback(&ctx, &CancellationToken::new()).await.unwrap();
        let calls = collab.unit_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(EtcdUnit::Upgrade, false), (EtcdUnit::Main, true)]);
    }

    #[tokio::test]
    async fn restore_without_backup_path_fails() {
        let collab = Arc::new(FakeCollaborators::default());
        let ctx = ctx_with_election(false, collab);
        let err = EtcdRestore.execute(&ctx, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OpeError::BadParameter { .. }));
    }

    #[tokio::test]
    async fn restore_reads_the_backup_path_from_phase_data() {
        let collab = Arc::new(FakeCollaborators::default());
        let mut ctx = ctx_with_election(false, collab);
        ctx.phase.data.backup_path = Some("/var/stratum/etcd-backup.tar".into());
        EtcdRestore.execute(&ctx, &CancellationToken::new()).await.unwrap();
    }
}
