//! Generated gRPC types for the agent fleet protocol plus conversion
//! helpers to and from [`stratum_common`] domain types.
//!
//! The wire types themselves come out of `agent.proto` via `tonic-build`
//! (see `build.rs`); this crate's hand-written surface is limited to the
//! `From`/`TryFrom` impls bridging them to the types the operator and the
//! agent actually compute with.

pub mod agent {
    tonic::include_proto!("stratum.agent.v1");
}

mod convert;

pub use agent::{
    AppendChangeRequest, AppendChangeResponse, CreatePlanRequest, CreatePlanResponse, ExecChunk,
    ExecRequest, GetChangelogRequest, GetChangelogResponse, GetLastOperationRequest,
    GetLastOperationResponse, GetPlanRequest, GetPlanResponse, JoinRequest, JoinResponse,
    PingPongRequest, PingPongResponse, PingPongResult, PingPongTuple, Probe, ShutdownRequest,
    ShutdownResponse, SystemInfo, UpdateOperationRequest, UpdateOperationResponse,
    ValidateRequest, ValidateResponse,
    agent_fleet_client::AgentFleetClient,
    agent_fleet_server::{AgentFleet, AgentFleetServer},
    cluster_store_client::ClusterStoreClient,
    cluster_store_server::{ClusterStore, ClusterStoreServer},
};
pub use convert::{
    cluster_name_from_wire, cluster_name_to_wire, operation_id_from_wire, operation_id_to_wire,
    ProtoConvertError,
};
