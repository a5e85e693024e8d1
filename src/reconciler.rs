//! The Plan Reconciler (C6): brokers the local and cluster changelog
//! stores and hands back the resolved plan. Runs opportunistically
//! (once per FSM cycle) and reactively (when a phase executor signals
//! a change).

use std::sync::Arc;

use stratum_common::changelog::diff;
use stratum_common::errors::{ErrorClass, OpeResult};
use stratum_common::ids::{ClusterName, OperationId};
use stratum_common::plan::{resolve_plan, Plan};
use stratum_common::store::PlanStore;

pub struct Reconciler {
    pub local: Arc<dyn PlanStore>,
    pub cluster: Option<Arc<dyn PlanStore>>,
}

impl Reconciler {
    pub fn new(local: Arc<dyn PlanStore>, cluster: Option<Arc<dyn PlanStore>>) -> Self {
        Self { local, cluster }
    }

    /// Runs one reconciliation pass and returns the resolved plan:
    /// sync both changelog directions (best-effort if the cluster
    /// store is unreachable), then replay the local changelog onto the
    /// static plan.
    pub async fn reconcile(&self, cluster: &ClusterName, op_id: OperationId, static_plan: &Plan) -> OpeResult<Plan> {
        self.sync(cluster, op_id).await;

        let local_log = self.local.get_operation_plan_changelog(cluster, op_id).await?;
        Ok(resolve_plan(static_plan, &local_log))
    }

    /// Copies local->cluster, then cluster->local changelog entries
    /// that the other side is missing. A transient cluster-store
    /// failure is swallowed — the local view stays authoritative and
    /// the next cycle retries.
    async fn sync(&self, cluster: &ClusterName, op_id: OperationId) {
        let Some(remote) = &self.cluster else { return };

        let local_log = match self.local.get_operation_plan_changelog(cluster, op_id).await {
            Ok(log) => log,
            Err(_) => return,
        };
        let remote_log = match remote.get_operation_plan_changelog(cluster, op_id).await {
            Ok(log) => log,
            Err(err) if err.classify() == ErrorClass::Transient => return,
            Err(_) => return,
        };

        for entry in diff(&local_log, &remote_log) {
            let _ = remote.create_operation_plan_change(entry).await;
        }
        for entry in diff(&remote_log, &local_log) {
            let _ = self.local.create_operation_plan_change(entry).await;
        }
    }
}
