//! Rollback (§4.4): rolling back phase `P` requires every phase that
//! transitively `requires` `P` to already be rolled back.

use std::collections::HashSet;
use std::sync::Arc;

use stratum_common::changelog::ChangeLogEntry;
use stratum_common::executors::{ClusterCollaborators, ExecutorRegistry, PhaseContext};
use stratum_common::ids::{ChangeId, PhaseId};
use stratum_common::plan::{Phase, PhaseState, Plan};
use stratum_common::{OpeError, OpeResult};
use tokio_util::sync::CancellationToken;

/// Every phase id that (transitively, through `requires`) depends on
/// `target`.
pub fn dependents_of(plan: &Plan, target: &PhaseId) -> Vec<PhaseId> {
    let flat = plan.flatten();
    let mut dependents = HashSet::new();
    let mut frontier = vec![target.clone()];
    while let Some(current) = frontier.pop() {
        for phase in &flat {
            if phase.requires.contains(&current) && dependents.insert(phase.id.clone()) {
                frontier.push(phase.id.clone());
            }
        }
    }
    dependents.into_iter().collect()
}

/// Rolls back `target`. Fails with [`OpeError::IllegalTransition`] if
/// `target` itself hasn't reached a terminal state, or
/// [`OpeError::IllegalRollback`] if a dependent leaf is running or has
/// finished without itself being rolled back.
pub async fn rollback_phase(
    plan: &Plan,
    target: &PhaseId,
    registry: &ExecutorRegistry,
    collaborators: Arc<dyn ClusterCollaborators>,
    local_advertise_ip: &str,
    cancel: &CancellationToken,
) -> OpeResult<ChangeLogEntry> {
    let phase = plan.find(target).ok_or_else(|| OpeError::PhaseNotFound { op_id: plan.op_id, phase: target.clone() })?;

    let target_state = phase.derived_state();
    if !matches!(target_state, PhaseState::Completed | PhaseState::Failed) {
        return Err(OpeError::IllegalTransition { phase: target.clone(), from: target_state, to: PhaseState::RolledBack });
    }

    for dependent_id in dependents_of(plan, target) {
        let dependent = plan.find(&dependent_id).expect("dependents_of only returns ids present in the plan");
        if dependent.is_leaf() && !matches!(dependent.derived_state(), PhaseState::RolledBack | PhaseState::Unstarted) {
            return Err(OpeError::IllegalRollback { phase: target.clone(), dependent: dependent_id });
        }
    }

    rollback_leaf(plan, phase, registry, collaborators, local_advertise_ip, cancel).await
}

async fn rollback_leaf(
    plan: &Plan,
    phase: &Phase,
    registry: &ExecutorRegistry,
    collaborators: Arc<dyn ClusterCollaborators>,
    local_advertise_ip: &str,
    cancel: &CancellationToken,
) -> OpeResult<ChangeLogEntry> {
    let executor = phase
        .executor_key
        .as_deref()
        .and_then(|key| registry.build(key))
        .ok_or_else(|| OpeError::ExecutorFatal { executor: "rollback".into(), message: format!("no executor for phase {}", phase.id) })?;

    let ctx = PhaseContext { phase: phase.clone(), local_advertise_ip: local_advertise_ip.to_string(), collaborators };
    executor.rollback(&ctx, cancel).await?;

    Ok(ChangeLogEntry {
        change_id: ChangeId::new(),
        cluster: plan.cluster.clone(),
        op_id: plan.op_id,
        phase_id: phase.id.clone(),
        new_state: PhaseState::RolledBack,
        created_ts: chrono::Utc::now(),
        error: None,
    })
}
