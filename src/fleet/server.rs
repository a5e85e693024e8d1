//! The coordinator's `tonic` service impl: only `Join` is meaningfully
//! handled here — `Exec`/`Validate`/`CheckPorts`/`CheckBandwidth`/
//! `Shutdown` are dialed by the coordinator *into* each agent (see
//! `RemoteShell`), so the coordinator's own handlers for them are
//! unreachable in normal operation and return `unimplemented`.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use stratum_common::errors::OpeError;
use stratum_proto::{
    AgentFleet, ExecChunk, ExecRequest, JoinRequest, JoinResponse, PingPongRequest, PingPongResponse,
    ShutdownRequest, ShutdownResponse, ValidateRequest, ValidateResponse, cluster_name_from_wire,
    operation_id_from_wire,
};
use tonic::{Request, Response, Status};

use super::AgentFleetCoordinator;

pub struct AgentFleetServerImpl {
    pub coordinator: Arc<AgentFleetCoordinator>,
}

#[tonic::async_trait]
impl AgentFleet for AgentFleetServerImpl {
    type ExecStream = Pin<Box<dyn Stream<Item = Result<ExecChunk, Status>> + Send + 'static>>;

    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let req = request.into_inner();
        let cluster = cluster_name_from_wire(&req.cluster);
        let op_id = operation_id_from_wire(&req.op_id)?;
        let system_info = req.system_info.map(Into::into).unwrap_or_else(|| stratum_common::fleet::SystemInfo {
            hostname: req.hostname.clone(),
            cpus: 0,
            memory_bytes: 0,
            kernel_version: String::new(),
            docker_version: String::new(),
        });

        self.coordinator
            .join(cluster, op_id, req.addr, req.hostname.clone(), req.provisioning_token, system_info)
            .await
            .map_err(ope_error_to_status)?;

        Ok(Response::new(JoinResponse { peer_id: req.hostname }))
    }

    async fn exec(&self, _request: Request<ExecRequest>) -> Result<Response<Self::ExecStream>, Status> {
        Err(Status::unimplemented("the coordinator dials agents for Exec; it does not serve it"))
    }

    async fn validate(&self, _request: Request<ValidateRequest>) -> Result<Response<ValidateResponse>, Status> {
        Err(Status::unimplemented("the coordinator dials agents for Validate; it does not serve it"))
    }

    async fn check_ports(&self, _request: Request<PingPongRequest>) -> Result<Response<PingPongResponse>, Status> {
        Err(Status::unimplemented("the coordinator dials agents for CheckPorts; it does not serve it"))
    }

    async fn check_bandwidth(&self, _request: Request<PingPongRequest>) -> Result<Response<PingPongResponse>, Status> {
        Err(Status::unimplemented("the coordinator dials agents for CheckBandwidth; it does not serve it"))
    }

    async fn shutdown(&self, _request: Request<ShutdownRequest>) -> Result<Response<ShutdownResponse>, Status> {
        Err(Status::unimplemented("the coordinator dials agents for Shutdown; it does not serve it"))
    }
}

fn ope_error_to_status(err: OpeError) -> Status {
    use stratum_common::errors::ErrorClass;
    let message = err.to_string();
    match err.classify() {
        ErrorClass::NotFound => Status::not_found(message),
        ErrorClass::AlreadyExists => Status::already_exists(message),
        ErrorClass::BadParameter => Status::invalid_argument(message),
        ErrorClass::AccessDenied => Status::permission_denied(message),
        ErrorClass::LimitExceeded => Status::resource_exhausted(message),
        ErrorClass::Transient => Status::unavailable(message),
        ErrorClass::Fatal => Status::internal(message),
    }
}
