//! The plan/phase data model (component C1).
//!
//! A [`Plan`] is a tree of [`Phase`]s created once at operation start.
//! The tree itself never mutates after creation — all dynamic state
//! (the derived [`PhaseState`] of each phase) lives in the changelog
//! and is recombined with the static tree by [`resolve_plan`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changelog::ChangeLogEntry;
use crate::ids::PhaseId;

/// One of the seven states an operation plan can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Install,
    Expand,
    Shrink,
    Update,
    Uninstall,
    Gc,
    UpdateEnvars,
}

/// A participating cluster node as captured in the plan snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub hostname: String,
    pub advertise_ip: String,
    pub role_label: String,
    pub cluster_role: ClusterRole,
    pub state_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Master,
    Node,
}

/// Locates a versioned package in the package store (out of scope: the
/// store itself is an external collaborator, referenced only by this
/// locator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLocator {
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for PackageLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCredential {
    pub token: String,
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Describes which masters should gain/lose leader-election
/// participation (used by the `/election` phase and by etcd/shutdown's
/// leader-first rollback rule).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionChange {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}

/// All fields a phase's data may carry; every field is optional because
/// each executor only reads the subset it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_server: Option<ServerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executing_server: Option<ServerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<ServerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageLocator>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_package: Option<PackageLocator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_package: Option<PackageLocator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_credential: Option<AgentCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_user: Option<ServiceUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opaque: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_change: Option<ElectionChange>,
    /// The path `etcd-restore` reads its snapshot from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}

/// The state of a single phase. Transitions are restricted to the
/// edges in [`PhaseState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    Unstarted,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl PhaseState {
    /// Whether `self -> next` is one of the legal edges from §3:
    /// `unstarted -> in_progress -> completed`, `in_progress -> failed`,
    /// `completed|failed -> rolled_back`.
    pub fn can_transition_to(&self, next: PhaseState) -> bool {
        use PhaseState::*;
        matches!(
            (self, next),
            (Unstarted, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Completed, RolledBack)
                | (Failed, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseState::Completed | PhaseState::Failed | PhaseState::RolledBack)
    }
}

/// A node in the plan tree. Non-leaf phases (`!children.is_empty()`)
/// have no executor of their own; their `state` is always the derived
/// one (see [`Phase::derived_state`]) and `data`/`executor_key` are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_key: Option<String>,
    pub step_index: u32,
    #[serde(default)]
    pub requires: Vec<PhaseId>,
    #[serde(default)]
    pub parallel: bool,
    pub updated_ts: DateTime<Utc>,
    #[serde(default)]
    pub data: PhaseData,
    #[serde(default)]
    pub state: PhaseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub children: Vec<Phase>,
}

impl Phase {
    pub fn leaf(id: PhaseId, description: &str, executor_key: &str, step_index: u32, requires: Vec<PhaseId>) -> Self {
        Self {
            id,
            description: description.to_string(),
            executor_key: Some(executor_key.to_string()),
            step_index,
            requires,
            parallel: false,
            updated_ts: Utc::now(),
            data: PhaseData::default(),
            state: PhaseState::Unstarted,
            error: None,
            children: Vec::new(),
        }
    }

    pub fn composite(id: PhaseId, description: &str, step_index: u32, parallel: bool, children: Vec<Phase>) -> Self {
        Self {
            id,
            description: description.to_string(),
            executor_key: None,
            step_index,
            requires: Vec::new(),
            parallel,
            updated_ts: Utc::now(),
            data: PhaseData::default(),
            state: PhaseState::Unstarted,
            error: None,
            children,
        }
    }

    pub fn with_data(mut self, data: PhaseData) -> Self {
        self.data = data;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Derives this phase's state from its children per the composite
    /// rule in §3: if all children share one state, that is the state;
    /// else if any child is failed/rolled_back, the parent is failed;
    /// otherwise in_progress. Leaves return their own `state` field.
    pub fn derived_state(&self) -> PhaseState {
        if self.is_leaf() {
            return self.state;
        }
        let child_states: Vec<PhaseState> = self.children.iter().map(Phase::derived_state).collect();
        let first = child_states[0];
        if child_states.iter().all(|s| *s == first) {
            return first;
        }
        if child_states
            .iter()
            .any(|s| matches!(s, PhaseState::Failed | PhaseState::RolledBack))
        {
            return PhaseState::Failed;
        }
        PhaseState::InProgress
    }
}

/// A snapshot of the plan root: one or more top-level phases plus the
/// operation context they were built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub op_id: crate::ids::OperationId,
    pub cluster: crate::ids::ClusterName,
    pub account_id: String,
    pub operation_type: OperationType,
    pub created_ts: DateTime<Utc>,
    pub roots: Vec<Phase>,
    pub dns_config: DnsConfig,
    pub servers: Vec<ServerSpec>,
    pub runtime_package: PackageLocator,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub nameservers: Vec<String>,
    pub search: Vec<String>,
}

impl Plan {
    /// Preorder traversal returning every phase in the tree exactly
    /// once. This is the canonical view for lookup by id and for
    /// completeness checks.
    pub fn flatten(&self) -> Vec<&Phase> {
        let mut out = Vec::new();
        for root in &self.roots {
            flatten_into(root, &mut out);
        }
        out
    }

    pub fn find(&self, id: &PhaseId) -> Option<&Phase> {
        self.flatten().into_iter().find(|p| &p.id == id)
    }

    /// All leaves are completed and there are no failures.
    pub fn is_completed(&self) -> bool {
        self.flatten().iter().filter(|p| p.is_leaf()).all(|p| p.state == PhaseState::Completed)
    }

    /// Any leaf is failed.
    pub fn has_failed(&self) -> bool {
        self.flatten().iter().filter(|p| p.is_leaf()).any(|p| p.state == PhaseState::Failed)
    }

    /// No leaf is completed or in progress (i.e. the plan made no
    /// progress at all, or every leaf that started has since failed or
    /// rolled back).
    pub fn is_failed(&self) -> bool {
        self.flatten()
            .iter()
            .filter(|p| p.is_leaf())
            .all(|p| !matches!(p.state, PhaseState::Completed | PhaseState::InProgress))
    }

    /// All phase ids referenced by `requires` resolve to a phase
    /// already present in the tree, and there are no duplicate ids.
    /// This backs the invariant checks in §3 and the builder's
    /// construction-time validation.
    pub fn validate_structure(&self) -> Result<(), String> {
        let flat = self.flatten();
        let mut seen = std::collections::HashSet::new();
        for phase in &flat {
            if !seen.insert(phase.id.clone()) {
                return Err(format!("duplicate phase id {}", phase.id));
            }
        }
        for phase in &flat {
            for dep in &phase.requires {
                if !seen.contains(dep) {
                    return Err(format!("phase {} requires unknown phase {}", phase.id, dep));
                }
            }
        }
        Ok(())
    }
}

fn flatten_into<'a>(phase: &'a Phase, out: &mut Vec<&'a Phase>) {
    out.push(phase);
    for child in &phase.children {
        flatten_into(child, out);
    }
}

/// Applies a changelog over a static plan, returning a new plan whose
/// phase states reflect the latest change (by `(created_ts, change_id)`)
/// for each phase id. The static plan passed in is never mutated; this
/// is `ResolvePlan` from §4.1.
pub fn resolve_plan(plan: &Plan, changelog: &[ChangeLogEntry]) -> Plan {
    let mut latest: HashMap<PhaseId, &ChangeLogEntry> = HashMap::new();
    for entry in changelog {
        match latest.get(&entry.phase_id) {
            Some(existing) if !entry.is_newer_than(existing) => {}
            _ => {
                latest.insert(entry.phase_id.clone(), entry);
            }
        }
    }

    let mut resolved = plan.clone();
    for root in &mut resolved.roots {
        apply_latest(root, &latest);
    }
    resolved
}

fn apply_latest(phase: &mut Phase, latest: &HashMap<PhaseId, &ChangeLogEntry>) {
    if let Some(change) = latest.get(&phase.id) {
        phase.state = change.new_state;
        phase.error = change.error.clone();
        phase.updated_ts = change.created_ts;
    }
    for child in &mut phase.children {
        apply_latest(child, latest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeLogEntry;
    use crate::ids::{ChangeId, OperationId};
    use chrono::Duration;

    fn sample_plan() -> Plan {
        let rbac = Phase::leaf(PhaseId::new("/rbac"), "create rbac", "rbac", 0, vec![]);
        Plan {
            op_id: OperationId::new(),
            cluster: crate::ids::ClusterName::new("test"),
            account_id: "acct".into(),
            operation_type: OperationType::Install,
            created_ts: Utc::now(),
            roots: vec![rbac],
            dns_config: DnsConfig::default(),
            servers: vec![],
            runtime_package: PackageLocator { name: "runtime".into(), version: "1.0.0".into() },
        }
    }

    #[test]
    fn flatten_yields_every_phase_once() {
        let bootstrap = Phase::composite(
            PhaseId::new("/bootstrap"),
            "bootstrap",
            0,
            true,
            vec![
                Phase::leaf(PhaseId::new("/bootstrap/m1"), "m1", "bootstrap", 0, vec![]),
                Phase::leaf(PhaseId::new("/bootstrap/n1"), "n1", "bootstrap", 0, vec![]),
            ],
        );
        let mut plan = sample_plan();
        plan.roots = vec![bootstrap];
        let flat = plan.flatten();
        assert_eq!(flat.len(), 3);
        let ids: Vec<_> = flat.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["/bootstrap", "/bootstrap/m1", "/bootstrap/n1"]);
    }

    #[test]
    fn derived_state_all_same() {
        let mut bootstrap = Phase::composite(
            PhaseId::new("/bootstrap"),
            "bootstrap",
            0,
            true,
            vec![
                Phase::leaf(PhaseId::new("/bootstrap/m1"), "m1", "bootstrap", 0, vec![]),
                Phase::leaf(PhaseId::new("/bootstrap/n1"), "n1", "bootstrap", 0, vec![]),
            ],
        );
        for c in &mut bootstrap.children {
            c.state = PhaseState::Completed;
        }
        assert_eq!(bootstrap.derived_state(), PhaseState::Completed);
    }

    #[test]
    fn derived_state_mixed_failure_wins() {
        let mut bootstrap = Phase::composite(
            PhaseId::new("/bootstrap"),
            "bootstrap",
            0,
            true,
            vec![
                Phase::leaf(PhaseId::new("/bootstrap/m1"), "m1", "bootstrap", 0, vec![]),
                Phase::leaf(PhaseId::new("/bootstrap/n1"), "n1", "bootstrap", 0, vec![]),
            ],
        );
        bootstrap.children[0].state = PhaseState::Completed;
        bootstrap.children[1].state = PhaseState::Failed;
        assert_eq!(bootstrap.derived_state(), PhaseState::Failed);
    }

    #[test]
    fn derived_state_mixed_in_progress() {
        let mut bootstrap = Phase::composite(
            PhaseId::new("/bootstrap"),
            "bootstrap",
            0,
            true,
            vec![
                Phase::leaf(PhaseId::new("/bootstrap/m1"), "m1", "bootstrap", 0, vec![]),
                Phase::leaf(PhaseId::new("/bootstrap/n1"), "n1", "bootstrap", 0, vec![]),
            ],
        );
        bootstrap.children[0].state = PhaseState::Completed;
        bootstrap.children[1].state = PhaseState::Unstarted;
        assert_eq!(bootstrap.derived_state(), PhaseState::InProgress);
    }

    #[test]
    fn resolve_plan_applies_latest_change_by_timestamp() {
        let plan = sample_plan();
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);
        let op_id = plan.op_id;
        let changelog = vec![
            ChangeLogEntry {
                change_id: ChangeId::new(),
                cluster: plan.cluster.clone(),
                op_id,
                phase_id: PhaseId::new("/rbac"),
                new_state: PhaseState::InProgress,
                created_ts: t1,
                error: None,
            },
            ChangeLogEntry {
                change_id: ChangeId::new(),
                cluster: plan.cluster.clone(),
                op_id,
                phase_id: PhaseId::new("/rbac"),
                new_state: PhaseState::Completed,
                created_ts: t2,
                error: None,
            },
        ];
        let resolved = resolve_plan(&plan, &changelog);
        assert_eq!(resolved.find(&PhaseId::new("/rbac")).unwrap().state, PhaseState::Completed);
    }

    #[test]
    fn is_completed_requires_all_leaves_completed() {
        let mut plan = sample_plan();
        assert!(!plan.is_completed());
        plan.roots[0].state = PhaseState::Completed;
        assert!(plan.is_completed());
        assert!(!plan.has_failed());
    }

    #[test]
    fn has_failed_detects_any_failed_leaf() {
        let mut plan = sample_plan();
        plan.roots[0].state = PhaseState::Failed;
        assert!(plan.has_failed());
        assert!(!plan.is_completed());
    }

    #[test]
    fn validate_structure_rejects_unknown_dependency() {
        let mut plan = sample_plan();
        plan.roots[0].requires.push(PhaseId::new("/nonexistent"));
        assert!(plan.validate_structure().is_err());
    }

    #[test]
    fn validate_structure_rejects_duplicate_ids() {
        let mut plan = sample_plan();
        let dup = plan.roots[0].clone();
        plan.roots.push(dup);
        assert!(plan.validate_structure().is_err());
    }

    #[test]
    fn phase_state_transitions_are_restricted() {
        assert!(PhaseState::Unstarted.can_transition_to(PhaseState::InProgress));
        assert!(PhaseState::InProgress.can_transition_to(PhaseState::Completed));
        assert!(PhaseState::InProgress.can_transition_to(PhaseState::Failed));
        assert!(PhaseState::Completed.can_transition_to(PhaseState::RolledBack));
        assert!(!PhaseState::Unstarted.can_transition_to(PhaseState::Completed));
        assert!(!PhaseState::Completed.can_transition_to(PhaseState::InProgress));
        assert!(!PhaseState::RolledBack.can_transition_to(PhaseState::Unstarted));
    }
}
