//! The Core API boundary (§6): the one surface the CLI (and any future
//! HTTP handler) drives. Glues the builder, FSM, fleet coordinator,
//! reconciler, operation group and plan store together.

use std::sync::Arc;
use std::time::Duration;

use stratum_common::errors::{OpeError, OpeResult};
use stratum_common::executors::{ClusterCollaborators, ExecutorRegistry};
use stratum_common::ids::{ClusterName, OperationId, PhaseId};
use stratum_common::operation::{OperationRecord, OperationState};
use stratum_common::plan::{OperationType, Plan};
use stratum_common::store::PlanStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::fsm::{rollback_phase, Fsm, ProgressEntry};
use crate::group::OperationGroup;
use crate::manifest::ApplicationManifest;
use crate::reconciler::Reconciler;

/// Environment knobs (§6) the FSM and fleet deployment steps consult.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry_interval: Duration,
    pub retry_attempts: u32,
    pub phase_timeout: Duration,
    pub max_concurrency: usize,
    pub max_masters: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(stratum_common::config::EnvKnobs::default())
    }
}

impl From<stratum_common::config::EnvKnobs> for EngineConfig {
    fn from(knobs: stratum_common::config::EnvKnobs) -> Self {
        Self {
            retry_interval: knobs.retry_interval,
            retry_attempts: knobs.retry_attempts,
            phase_timeout: knobs.phase_timeout,
            max_concurrency: knobs.max_concurrency,
            max_masters: knobs.max_masters,
        }
    }
}

pub struct Engine {
    pub local_store: Arc<dyn PlanStore>,
    pub cluster_store: Option<Arc<dyn PlanStore>>,
    pub registry: Arc<ExecutorRegistry>,
    pub collaborators: Arc<dyn ClusterCollaborators>,
    pub local_advertise_ip: String,
    pub config: EngineConfig,
    group: OperationGroup,
    reconciler: Reconciler,
}

impl Engine {
    pub fn new(
        local_store: Arc<dyn PlanStore>,
        cluster_store: Option<Arc<dyn PlanStore>>,
        registry: Arc<ExecutorRegistry>,
        collaborators: Arc<dyn ClusterCollaborators>,
        local_advertise_ip: String,
        config: EngineConfig,
    ) -> Self {
        let group = OperationGroup::new(local_store.clone());
        let reconciler = Reconciler::new(local_store.clone(), cluster_store.clone());
        Self { local_store, cluster_store, registry, collaborators, local_advertise_ip, config, group, reconciler }
    }

    pub async fn create_operation(&self, cluster: ClusterName, account: &str, operation_type: OperationType) -> OpeResult<OperationRecord> {
        self.group.create_operation(cluster, account, operation_type).await
    }

    pub async fn get_operation(&self, cluster: &ClusterName, op_id: Option<OperationId>) -> OpeResult<Option<OperationRecord>> {
        self.local_store.get_last_operation(cluster, op_id).await
    }

    /// Resolves the plan through the reconciler: syncs local/cluster
    /// changelogs, then replays the local (now-synced) log onto the
    /// static plan.
    pub async fn get_operation_plan(&self, cluster: &ClusterName, op_id: OperationId) -> OpeResult<Plan> {
        let static_plan = self.local_store.get_operation_plan(cluster, op_id).await?;
        self.reconciler.reconcile(cluster, op_id, &static_plan).await
    }

    /// Only valid before the operation's first changelog entry exists.
    pub async fn create_operation_plan(&self, plan: &Plan) -> OpeResult<()> {
        self.local_store.create_operation_plan(plan).await?;
        if let Some(cluster_store) = &self.cluster_store {
            let _ = cluster_store.create_operation_plan(plan).await;
        }
        Ok(())
    }

    pub async fn update_operation_state(
        &self,
        cluster: &ClusterName,
        op_id: OperationId,
        expected: OperationState,
        new: OperationState,
    ) -> OpeResult<OperationRecord> {
        self.group.compare_and_swap_operation_state(cluster, op_id, expected, new).await
    }

    /// Drives the plan forward one FSM cycle, running every currently
    /// runnable phase to completion or failure.
    pub async fn execute_cycle(&self, plan: &Plan, cancel: &CancellationToken, progress: mpsc::Sender<ProgressEntry>) -> OpeResult<Plan> {
        let fsm = Fsm {
            store: self.local_store.clone(),
            registry: self.registry.clone(),
            collaborators: self.collaborators.clone(),
            local_advertise_ip: self.local_advertise_ip.clone(),
            retry_interval: self.config.retry_interval,
            retry_attempts: self.config.retry_attempts,
            phase_timeout: self.config.phase_timeout,
            max_concurrency: self.config.max_concurrency,
            progress,
        };
        fsm.run_cycle(plan, cancel).await?;
        self.get_operation_plan(&plan.cluster, plan.op_id).await
    }

    /// Drives the FSM until every phase is terminal or cancellation
    /// fires. Per §4.4 step 5, a cycle that claims nothing while the
    /// plan is still incomplete means no phase can make progress
    /// (every remaining leaf is blocked on an unmet `requires`) — that
    /// halts the drive with an error rather than spinning forever.
    pub async fn execute_phase(&self, cluster: &ClusterName, op_id: OperationId, cancel: &CancellationToken) -> OpeResult<Plan> {
        let (progress_tx, _progress_rx) = mpsc::channel(32);
        let fsm = Fsm {
            store: self.local_store.clone(),
            registry: self.registry.clone(),
            collaborators: self.collaborators.clone(),
            local_advertise_ip: self.local_advertise_ip.clone(),
            retry_interval: self.config.retry_interval,
            retry_attempts: self.config.retry_attempts,
            phase_timeout: self.config.phase_timeout,
            max_concurrency: self.config.max_concurrency,
            progress: progress_tx,
        };

        loop {
            let plan = self.get_operation_plan(cluster, op_id).await?;
            if plan.is_completed() || plan.has_failed() || cancel.is_cancelled() {
                return Ok(plan);
            }
            let entries = fsm.run_cycle(&plan, cancel).await?;
            if entries.is_empty() {
                return Err(OpeError::ExecutorFatal {
                    executor: "fsm".into(),
                    message: format!("no phase is runnable for operation {op_id} but the plan is not terminal"),
                });
            }
        }
    }

    pub async fn rollback_phase(&self, cluster: &ClusterName, op_id: OperationId, phase: &PhaseId, cancel: &CancellationToken) -> OpeResult<()> {
        let plan = self.get_operation_plan(cluster, op_id).await?;
        let entry = rollback_phase(&plan, phase, &self.registry, self.collaborators.clone(), &self.local_advertise_ip, cancel).await?;
        self.local_store.create_operation_plan_change(&entry).await
    }

    pub async fn complete_operation(&self, cluster: &ClusterName, op_id: OperationId, err: Option<String>) -> OpeResult<OperationRecord> {
        let new_state = if err.is_some() { OperationState::Failed } else { OperationState::Completed };
        let mut record = self.group.compare_and_swap_operation_state(cluster, op_id, OperationState::InProgress, new_state).await?;
        record.error = err;
        self.local_store.update_operation(&record).await?;
        Ok(record)
    }
}

/// Builds the manifest-driven plan for a fresh install; other
/// operation types have their own entry points in [`crate::builder`].
pub fn build_install_plan(
    op_id: OperationId,
    cluster: ClusterName,
    account_id: &str,
    manifest: &ApplicationManifest,
    max_masters: usize,
) -> Plan {
    crate::builder::install::build(op_id, cluster, account_id, manifest, max_masters)
}
