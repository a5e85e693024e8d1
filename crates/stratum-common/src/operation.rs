//! The operation record and its legal state machine (backs C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClusterName, OperationId};
use crate::plan::OperationType;

/// Legal operation states: `created -> ready -> in_progress -> {completed|failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Created,
    Ready,
    InProgress,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }

    /// Whether `self -> next` is a legal CAS transition.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Created, Ready) | (Ready, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }
}

/// Type-specific substate; only the upgrade operation currently needs
/// one (which etcd stage it is in, for resuming after a leader
/// handoff — see the Open Question on leader handoff in the design
/// notes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSubstate {
    pub etcd_stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub cluster: ClusterName,
    pub account: String,
    pub operation_type: OperationType,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
    pub state: OperationState,
    #[serde(default)]
    pub upgrade_substate: UpgradeSubstate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn new(id: OperationId, cluster: ClusterName, account: &str, operation_type: OperationType) -> Self {
        let now = Utc::now();
        Self {
            id,
            cluster,
            account: account.to_string(),
            operation_type,
            created_ts: now,
            updated_ts: now,
            state: OperationState::Created,
            upgrade_substate: UpgradeSubstate::default(),
            error: None,
        }
    }
}

/// A request to start a new operation; consumed by the plan builder
/// (C2, in the operator crate) together with the application manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub cluster: ClusterName,
    pub account: String,
    pub operation_type: OperationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_follow_created_ready_in_progress_terminal() {
        assert!(OperationState::Created.can_transition_to(OperationState::Ready));
        assert!(OperationState::Ready.can_transition_to(OperationState::InProgress));
        assert!(OperationState::InProgress.can_transition_to(OperationState::Completed));
        assert!(OperationState::InProgress.can_transition_to(OperationState::Failed));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!OperationState::Created.can_transition_to(OperationState::InProgress));
        assert!(!OperationState::Completed.can_transition_to(OperationState::Ready));
        assert!(!OperationState::Failed.can_transition_to(OperationState::InProgress));
    }

    #[test]
    fn terminal_states() {
        assert!(OperationState::Completed.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::InProgress.is_terminal());
    }
}
