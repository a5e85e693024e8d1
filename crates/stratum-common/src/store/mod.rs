//! The plan-store interface (C1) and its per-host embedded backend.
//!
//! The cluster-replicated backend lives in the `stratum` operator
//! crate (it is a `tonic` client over `stratum-proto`, which cannot be
//! a dependency of this crate without creating a cycle); both backends
//! implement [`PlanStore`].

mod local;

pub use local::LocalStore;

use async_trait::async_trait;

use crate::changelog::ChangeLogEntry;
use crate::ids::{ClusterName, OperationId};
use crate::operation::OperationRecord;
use crate::plan::Plan;
use crate::OpeResult;

/// Common interface implemented by the local (per-node) and cluster
/// (replicated) plan stores.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create_operation_plan(&self, plan: &Plan) -> OpeResult<()>;

    async fn get_operation_plan(&self, cluster: &ClusterName, op_id: OperationId) -> OpeResult<Plan>;

    async fn get_operation_plan_changelog(
        &self,
        cluster: &ClusterName,
        op_id: OperationId,
    ) -> OpeResult<Vec<ChangeLogEntry>>;

    /// Appends a change. Duplicate `change_id`s are idempotent: this
    /// must return `Ok(())` without creating a second row.
    async fn create_operation_plan_change(&self, entry: &ChangeLogEntry) -> OpeResult<()>;

    async fn update_operation(&self, record: &OperationRecord) -> OpeResult<()>;

    async fn get_last_operation(
        &self,
        cluster: &ClusterName,
        op_id: Option<OperationId>,
    ) -> OpeResult<Option<OperationRecord>>;
}
