//! A `PlanStore` over the cluster controller's `ClusterStore` gRPC
//! service. Plan/changelog/operation payloads cross the wire as JSON
//! (`serde_json`) rather than hand-mapped proto messages — this store
//! already owns a stable JSON contract for the CLI, so reusing it here
//! avoids maintaining the phase tree twice in two schemas.

use async_trait::async_trait;
use stratum_common::changelog::ChangeLogEntry;
use stratum_common::errors::OpeError;
use stratum_common::ids::{ClusterName, OperationId};
use stratum_common::operation::OperationRecord;
use stratum_common::plan::Plan;
use stratum_common::store::PlanStore;
use stratum_common::OpeResult;
use stratum_proto::{
    cluster_name_to_wire, operation_id_to_wire, AppendChangeRequest, ClusterStoreClient,
    CreatePlanRequest, GetChangelogRequest, GetLastOperationRequest, GetPlanRequest,
    UpdateOperationRequest,
};
use tonic::transport::Channel;

pub struct ClusterStoreBackend {
    client: ClusterStoreClient<Channel>,
}

impl ClusterStoreBackend {
    pub async fn connect(endpoint: String) -> OpeResult<Self> {
        let client = ClusterStoreClient::connect(endpoint)
            .await
            .map_err(|source| OpeError::TransientUnavailable { message: source.to_string() })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PlanStore for ClusterStoreBackend {
    async fn create_operation_plan(&self, plan: &Plan) -> OpeResult<()> {
        let plan_json = serde_json::to_vec(plan).map_err(|e| OpeError::Other(e.into()))?;
        let request = CreatePlanRequest { op_id: operation_id_to_wire(plan.op_id), plan_json };
        self.client.clone().create_plan(request).await?;
        Ok(())
    }

    async fn get_operation_plan(&self, _cluster: &ClusterName, op_id: OperationId) -> OpeResult<Plan> {
        let request = GetPlanRequest { op_id: operation_id_to_wire(op_id) };
        let response = self.client.clone().get_plan(request).await?.into_inner();
        serde_json::from_slice(&response.plan_json)
            .map_err(|e| OpeError::Other(e.into()))
    }

    async fn get_operation_plan_changelog(
        &self,
        _cluster: &ClusterName,
        op_id: OperationId,
    ) -> OpeResult<Vec<ChangeLogEntry>> {
        let request = GetChangelogRequest { op_id: operation_id_to_wire(op_id) };
        let response = self.client.clone().get_changelog(request).await?.into_inner();
        response
            .entries_json
            .iter()
            .map(|raw| serde_json::from_slice(raw).map_err(|e| OpeError::Other(e.into())))
            .collect()
    }

    async fn create_operation_plan_change(&self, entry: &ChangeLogEntry) -> OpeResult<()> {
        let entry_json = serde_json::to_vec(entry).map_err(|e| OpeError::Other(e.into()))?;
        let request = AppendChangeRequest { op_id: operation_id_to_wire(entry.op_id), entry_json };
        self.client.clone().append_change(request).await?;
        Ok(())
    }

    async fn update_operation(&self, record: &OperationRecord) -> OpeResult<()> {
        let record_json = serde_json::to_vec(record).map_err(|e| OpeError::Other(e.into()))?;
        let request = UpdateOperationRequest {
            cluster: cluster_name_to_wire(&record.cluster),
            op_id: operation_id_to_wire(record.id),
            record_json,
        };
        self.client.clone().update_operation(request).await?;
        Ok(())
    }

    async fn get_last_operation(
        &self,
        cluster: &ClusterName,
        op_id: Option<OperationId>,
    ) -> OpeResult<Option<OperationRecord>> {
        let request = GetLastOperationRequest {
            cluster: cluster_name_to_wire(cluster),
            op_id: op_id.map(operation_id_to_wire),
        };
        let response = self.client.clone().get_last_operation(request).await?.into_inner();
        match response.record_json {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(|e| OpeError::Other(e.into()))?)),
            None => Ok(None),
        }
    }
}
