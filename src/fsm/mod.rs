//! The FSM runtime (C4): drives one plan to completion by repeatedly
//! picking runnable phases, claiming them via a changelog append, and
//! running their executor's PreCheck/Execute/Rollback cycle.

mod progress;
mod rollback;

pub use progress::ProgressEntry;
pub use rollback::rollback_phase;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use stratum_common::changelog::ChangeLogEntry;
use stratum_common::errors::ErrorClass;
use stratum_common::executors::{ClusterCollaborators, ExecutorRegistry, PhaseContext, PreCheckOutcome};
use stratum_common::ids::ChangeId;
use stratum_common::plan::{Phase, PhaseState, Plan};
use stratum_common::store::PlanStore;
use stratum_common::{OpeError, OpeResult};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Phases eligible to start this cycle: unstarted, every `requires`
/// phase completed, and no non-parallel sibling already in progress.
pub fn runnable_phases(plan: &Plan) -> Vec<&Phase> {
    let flat = plan.flatten();
    let completed: HashSet<_> = flat.iter().filter(|p| p.derived_state() == PhaseState::Completed).map(|p| p.id.clone()).collect();

    let mut in_progress_parents: HashSet<_> = HashSet::new();
    collect_blocked_parents(&plan.roots, &mut in_progress_parents);

    flat.into_iter()
        .filter(|p| p.is_leaf() && p.state == PhaseState::Unstarted)
        .filter(|p| p.requires.iter().all(|r| completed.contains(r)))
        .filter(|p| !in_progress_parents.contains(&p.id))
        .collect()
}

/// For every non-parallel composite with an in-progress or otherwise
/// blocked child, every leaf that isn't next in declaration order is
/// blocked. Conservatively: once any child of a non-parallel parent is
/// in_progress, only that child may proceed; all not-yet-started
/// siblings are blocked until it completes.
fn collect_blocked_parents(phases: &[Phase], blocked: &mut HashSet<stratum_common::ids::PhaseId>) {
    for phase in phases {
        if !phase.parallel && !phase.is_leaf() {
            let any_in_progress = phase.children.iter().any(|c| c.derived_state() == PhaseState::InProgress);
            if any_in_progress {
                for child in &phase.children {
                    if child.derived_state() == PhaseState::Unstarted {
                        blocked.insert(child.id.clone());
                        mark_subtree(child, blocked);
                    }
                }
            }
        }
        collect_blocked_parents(&phase.children, blocked);
    }
}

fn mark_subtree(phase: &Phase, blocked: &mut HashSet<stratum_common::ids::PhaseId>) {
    for child in &phase.children {
        blocked.insert(child.id.clone());
        mark_subtree(child, blocked);
    }
}

pub struct Fsm {
    pub store: Arc<dyn PlanStore>,
    pub registry: Arc<ExecutorRegistry>,
    pub collaborators: Arc<dyn ClusterCollaborators>,
    pub local_advertise_ip: String,
    pub retry_interval: Duration,
    pub retry_attempts: u32,
    pub phase_timeout: Duration,
    pub max_concurrency: usize,
    pub progress: mpsc::Sender<ProgressEntry>,
}

impl Fsm {
    /// Runs one cycle: claims every currently-runnable phase and drives
    /// each to completion or failure, honoring `max_concurrency` and
    /// `cancel`. Returns the changelog entries appended this cycle.
    pub async fn run_cycle(&self, plan: &Plan, cancel: &CancellationToken) -> OpeResult<Vec<ChangeLogEntry>> {
        let runnable: Vec<Phase> = runnable_phases(plan).into_iter().cloned().collect();
        if runnable.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut handles = Vec::new();
        for phase in runnable {
            let claim = ChangeLogEntry {
                change_id: ChangeId::new(),
                cluster: plan.cluster.clone(),
                op_id: plan.op_id,
                phase_id: phase.id.clone(),
                new_state: PhaseState::InProgress,
                created_ts: now(),
                error: None,
            };
            self.store.create_operation_plan_change(&claim).await?;

            let semaphore = semaphore.clone();
            let cancel = cancel.child_token();
            let this = self.clone_inner();
            let cluster = plan.cluster.clone();
            let op_id = plan.op_id;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                this.run_phase(cluster, op_id, phase, &cancel).await
            }));
        }

        let mut entries = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(join_err) => {
                    return Err(OpeError::ExecutorFatal {
                        executor: "fsm".into(),
                        message: format!("phase task panicked: {join_err}"),
                    })
                }
            }
        }
        for entry in &entries {
            self.store.create_operation_plan_change(entry).await?;
        }
        Ok(entries)
    }

    /// Runs a single claimed phase's PreCheck/Execute cycle, retrying
    /// `Transient` failures with linear backoff up to `retry_attempts`
    /// bounded by `phase_timeout`, and returns the terminal changelog
    /// entry (`completed` or `failed`).
    async fn run_phase(
        &self,
        cluster: stratum_common::ids::ClusterName,
        op_id: stratum_common::ids::OperationId,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> ChangeLogEntry {
        let phase_id = phase.id.clone();
        let entry = |new_state, error| ChangeLogEntry {
            change_id: ChangeId::new(),
            cluster: cluster.clone(),
            op_id,
            phase_id: phase_id.clone(),
            new_state,
            created_ts: now(),
            error,
        };

        let executor = match phase.executor_key.as_deref().and_then(|key| self.registry.build(key)) {
            Some(executor) => executor,
            None => return entry(PhaseState::Failed, Some(format!("no executor registered for phase {phase_id}"))),
        };

        let ctx = PhaseContext {
            phase: phase.clone(),
            local_advertise_ip: self.local_advertise_ip.clone(),
            collaborators: self.collaborators.clone(),
        };

        match executor.pre_check(&ctx, cancel).await {
            Ok(PreCheckOutcome::RightHost) => {}
            Ok(PreCheckOutcome::WrongHost { .. }) => {
                // Deferred to the correct node by C5; no progress this cycle.
                return entry(PhaseState::Unstarted, None);
            }
            Ok(PreCheckOutcome::CannotCheck { .. }) => {
                // No target host named: proceed anyway (e.g. `gc`).
            }
            Err(err) => return entry(PhaseState::Failed, Some(err.to_string())),
        }

        let result = tokio::time::timeout(self.phase_timeout, self.execute_with_retry(executor.as_ref(), &ctx, cancel)).await;

        match result {
            Ok(Ok(())) => entry(PhaseState::Completed, None),
            Ok(Err(err)) => entry(PhaseState::Failed, Some(err.to_string())),
            Err(_elapsed) => entry(PhaseState::Failed, Some("phase timed out".to_string())),
        }
    }

    async fn execute_with_retry(
        &self,
        executor: &dyn stratum_common::executors::Executor,
        ctx: &PhaseContext,
        cancel: &CancellationToken,
    ) -> OpeResult<()> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                let _ = executor.rollback(ctx, cancel).await;
                return Err(OpeError::ExecutorFatal { executor: "fsm".into(), message: "cancelled".into() });
            }
            match executor.execute(ctx, cancel).await {
                Ok(()) => return Ok(()),
                Err(err) if err.classify() == ErrorClass::Transient && attempt < self.retry_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn clone_inner(&self) -> Arc<Fsm> {
        Arc::new(Fsm {
            store: self.store.clone(),
            registry: self.registry.clone(),
            collaborators: self.collaborators.clone(),
            local_advertise_ip: self.local_advertise_ip.clone(),
            retry_interval: self.retry_interval,
            retry_attempts: self.retry_attempts,
            phase_timeout: self.phase_timeout,
            max_concurrency: self.max_concurrency,
            progress: self.progress.clone(),
        })
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
