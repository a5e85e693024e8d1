//! The Operation Group (C7): a per-cluster serialization lock around
//! operation state. CAS is the only permitted mutation path once an
//! operation is created.

use std::sync::Arc;

use stratum_common::errors::{OpeError, OpeResult};
use stratum_common::ids::{ClusterName, OperationId};
use stratum_common::operation::{OperationRecord, OperationState};
use stratum_common::store::PlanStore;
use tokio::sync::Mutex;

/// Coordinates operation creation/CAS within this process; the
/// persisted `OperationRecord` itself is the cross-process source of
/// truth.
pub struct OperationGroup {
    store: Arc<dyn PlanStore>,
    lock: Mutex<()>,
}

impl OperationGroup {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self { store, lock: Mutex::new(()) }
    }

    /// Fails `AlreadyExists` if a non-terminal operation already
    /// exists for this cluster.
    pub async fn create_operation(&self, cluster: ClusterName, account: &str, operation_type: stratum_common::plan::OperationType) -> OpeResult<OperationRecord> {
        let _guard = self.lock.lock().await;

        if let Some(existing) = self.store.get_last_operation(&cluster, None).await? {
            if !existing.state.is_terminal() {
                return Err(OpeError::OperationAlreadyExists { cluster: cluster.as_str().to_string() });
            }
        }

        let record = OperationRecord::new(OperationId::new(), cluster, account, operation_type);
        self.store.update_operation(&record).await?;
        Ok(record)
    }

    /// The only permitted operation-state mutation: fails
    /// `IllegalTransition` if `expected -> new` is not a legal edge, or
    /// if the persisted state no longer matches `expected` (lost the
    /// race to a concurrent writer).
    pub async fn compare_and_swap_operation_state(
        &self,
        cluster: &ClusterName,
        op_id: OperationId,
        expected: OperationState,
        new: OperationState,
    ) -> OpeResult<OperationRecord> {
        let _guard = self.lock.lock().await;

        let mut record = self
            .store
            .get_last_operation(cluster, Some(op_id))
            .await?
            .ok_or(OpeError::PlanNotFound { op_id })?;

        if record.state != expected {
            return Err(OpeError::BadParameter {
                message: format!("operation {op_id} is in state {:?}, not the expected {expected:?}", record.state),
            });
        }
        if !expected.can_transition_to(new) {
            return Err(OpeError::BadParameter {
                message: format!("operation {op_id} cannot transition from {expected:?} to {new:?}"),
            });
        }

        record.state = new;
        record.updated_ts = chrono::Utc::now();
        self.store.update_operation(&record).await?;
        Ok(record)
    }

    pub async fn delete_operation(&self, cluster: &ClusterName, op_id: OperationId) -> OpeResult<()> {
        let _guard = self.lock.lock().await;
        let mut record = self
            .store
            .get_last_operation(cluster, Some(op_id))
            .await?
            .ok_or(OpeError::PlanNotFound { op_id })?;
        record.state = OperationState::Failed;
        self.store.update_operation(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use stratum_common::changelog::ChangeLogEntry;
    use stratum_common::plan::{OperationType, Plan};

    struct MemoryStore {
        record: StdMutex<Option<OperationRecord>>,
    }

    #[async_trait]
    impl PlanStore for MemoryStore {
        async fn create_operation_plan(&self, _plan: &Plan) -> OpeResult<()> {
            Ok(())
        }
        async fn get_operation_plan(&self, _cluster: &ClusterName, _op_id: OperationId) -> OpeResult<Plan> {
            unimplemented!()
        }
        async fn get_operation_plan_changelog(&self, _cluster: &ClusterName, _op_id: OperationId) -> OpeResult<Vec<ChangeLogEntry>> {
            Ok(vec![])
        }
        async fn create_operation_plan_change(&self, _entry: &ChangeLogEntry) -> OpeResult<()> {
            Ok(())
        }
        async fn update_operation(&self, record: &OperationRecord) -> OpeResult<()> {
            *self.record.lock().unwrap() = Some(record.clone());
            Ok(())
        }
        async fn get_last_operation(&self, _cluster: &ClusterName, _op_id: Option<OperationId>) -> OpeResult<Option<OperationRecord>> {
            Ok(self.record.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn create_fails_while_a_non_terminal_operation_exists() {
        let store = Arc::new(MemoryStore { record: StdMutex::new(None) });
        let group = OperationGroup::new(store);
        let cluster = ClusterName::new("c1");
        group.create_operation(cluster.clone(), "acct", OperationType::Install).await.unwrap();
        let result = group.create_operation(cluster, "acct", OperationType::Install).await;
        assert!(matches!(result, Err(OpeError::OperationAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn cas_moves_through_the_legal_state_sequence() {
        let store = Arc::new(MemoryStore { record: StdMutex::new(None) });
        let group = OperationGroup::new(store);
        let cluster = ClusterName::new("c1");
        let record = group.create_operation(cluster.clone(), "acct", OperationType::Install).await.unwrap();

        let record = group
            .compare_and_swap_operation_state(&cluster, record.id, OperationState::Created, OperationState::Ready)
            .await
            .unwrap();
        assert_eq!(record.state, OperationState::Ready);

        let result = group
            .compare_and_swap_operation_state(&cluster, record.id, OperationState::Created, OperationState::InProgress)
            .await;
        assert!(result.is_err());
    }
}
