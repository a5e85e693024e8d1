//! The append-only changelog: the only way plan state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, ClusterName, OperationId, PhaseId};
use crate::plan::PhaseState;

/// One phase-state transition. `change_id` is supplied by the caller
/// (a v4 UUID) so retries across a network partition are idempotent:
/// re-appending the same `change_id` is a no-op, not a duplicate entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub change_id: ChangeId,
    pub cluster: ClusterName,
    pub op_id: OperationId,
    pub phase_id: PhaseId,
    pub new_state: PhaseState,
    pub created_ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChangeLogEntry {
    /// Ordering used to pick the "latest" entry for a phase id:
    /// `created_ts`, ties broken by `change_id` (lexicographic on the
    /// UUID's string form, per §4.6's "ties by lexicographic
    /// `change_id`" rule).
    pub fn is_newer_than(&self, other: &ChangeLogEntry) -> bool {
        (self.created_ts, self.change_id.as_uuid().to_string())
            > (other.created_ts, other.change_id.as_uuid().to_string())
    }
}

/// Returns the multiset `src \ dst` by `change_id` — the entries in
/// `src` whose `change_id` does not appear in `dst`. Used by the
/// reconciler to decide what to copy in each direction.
pub fn diff<'a>(src: &'a [ChangeLogEntry], dst: &[ChangeLogEntry]) -> Vec<&'a ChangeLogEntry> {
    let dst_ids: std::collections::HashSet<ChangeId> = dst.iter().map(|e| e.change_id).collect();
    src.iter().filter(|e| !dst_ids.contains(&e.change_id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ClusterName, OperationId};
    use chrono::Duration;

    fn entry(change_id: ChangeId, ts: DateTime<Utc>) -> ChangeLogEntry {
        ChangeLogEntry {
            change_id,
            cluster: ClusterName::new("c1"),
            op_id: OperationId::new(),
            phase_id: PhaseId::new("/rbac"),
            new_state: PhaseState::Completed,
            created_ts: ts,
            error: None,
        }
    }

    #[test]
    fn diff_returns_exactly_the_set_difference_by_change_id() {
        let now = Utc::now();
        let shared = entry(ChangeId::new(), now);
        let only_src = entry(ChangeId::new(), now + Duration::seconds(1));
        let only_dst = entry(ChangeId::new(), now + Duration::seconds(2));

        let src = vec![shared.clone(), only_src.clone()];
        let dst = vec![shared.clone(), only_dst.clone()];

        let d = diff(&src, &dst);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].change_id, only_src.change_id);
    }

    #[test]
    fn diff_is_empty_for_identical_logs() {
        let now = Utc::now();
        let a = entry(ChangeId::new(), now);
        let log = vec![a];
        assert!(diff(&log, &log).is_empty());
    }

    #[test]
    fn is_newer_than_breaks_ties_by_change_id_string_order() {
        let now = Utc::now();
        let low = entry(ChangeId::from_uuid(uuid::Uuid::nil()), now);
        let high = entry(ChangeId::from_uuid(uuid::Uuid::max()), now);
        assert!(high.is_newer_than(&low));
        assert!(!low.is_newer_than(&high));
    }
}
