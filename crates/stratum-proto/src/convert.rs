//! Conversions between generated wire types and the domain types in
//! `stratum_common::fleet`. Kept separate from `lib.rs` so the
//! `tonic::include_proto!` expansion and hand-written conversion code
//! don't fight for the same module.

use std::time::Duration;

use stratum_common::fleet::{PingPongResult, PingPongTuple, Probe, SystemInfo};
use stratum_common::ids::{ClusterName, OperationId};

use crate::agent;

#[derive(Debug, thiserror::Error)]
pub enum ProtoConvertError {
    #[error("invalid operation id {value:?}: {source}")]
    InvalidOperationId { value: String, source: uuid::Error },
}

impl From<ProtoConvertError> for tonic::Status {
    fn from(err: ProtoConvertError) -> Self {
        tonic::Status::invalid_argument(err.to_string())
    }
}

pub fn operation_id_to_wire(op_id: OperationId) -> String {
    op_id.as_uuid().to_string()
}

pub fn operation_id_from_wire(value: &str) -> Result<OperationId, ProtoConvertError> {
    uuid::Uuid::parse_str(value)
        .map(OperationId::from_uuid)
        .map_err(|source| ProtoConvertError::InvalidOperationId { value: value.to_string(), source })
}

pub fn cluster_name_to_wire(cluster: &ClusterName) -> String {
    cluster.as_str().to_string()
}

pub fn cluster_name_from_wire(value: &str) -> ClusterName {
    ClusterName::new(value)
}

impl From<&SystemInfo> for agent::SystemInfo {
    fn from(info: &SystemInfo) -> Self {
        agent::SystemInfo {
            hostname: info.hostname.clone(),
            cpus: info.cpus,
            memory_bytes: info.memory_bytes,
            kernel_version: info.kernel_version.clone(),
            docker_version: info.docker_version.clone(),
        }
    }
}

impl From<agent::SystemInfo> for SystemInfo {
    fn from(info: agent::SystemInfo) -> Self {
        SystemInfo {
            hostname: info.hostname,
            cpus: info.cpus,
            memory_bytes: info.memory_bytes,
            kernel_version: info.kernel_version,
            docker_version: info.docker_version,
        }
    }
}

impl From<&Probe> for agent::Probe {
    fn from(probe: &Probe) -> Self {
        agent::Probe {
            name: probe.name.clone(),
            passed: probe.passed,
            message: probe.message.clone(),
        }
    }
}

impl From<agent::Probe> for Probe {
    fn from(probe: agent::Probe) -> Self {
        Probe { name: probe.name, passed: probe.passed, message: probe.message }
    }
}

impl From<&PingPongTuple> for agent::PingPongTuple {
    fn from(tuple: &PingPongTuple) -> Self {
        agent::PingPongTuple {
            addr: tuple.addr.clone(),
            other_addrs: tuple.other_addrs.clone(),
            port: tuple.port as u32,
            duration_ms: tuple.duration.as_millis() as u64,
        }
    }
}

impl From<agent::PingPongTuple> for PingPongTuple {
    fn from(tuple: agent::PingPongTuple) -> Self {
        PingPongTuple {
            addr: tuple.addr,
            other_addrs: tuple.other_addrs,
            port: tuple.port as u16,
            duration: Duration::from_millis(tuple.duration_ms),
        }
    }
}

impl From<&PingPongResult> for agent::PingPongResult {
    fn from(result: &PingPongResult) -> Self {
        agent::PingPongResult { ok: result.ok, message: result.message.clone() }
    }
}

impl From<agent::PingPongResult> for PingPongResult {
    fn from(result: agent::PingPongResult) -> Self {
        PingPongResult { ok: result.ok, message: result.message }
    }
}
