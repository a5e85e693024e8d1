//! Domain types for the agent fleet (C5). The gRPC wire shapes live in
//! `stratum-proto`; these are what the coordinator and the executors
//! actually compute with.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClusterName, OperationId};

/// Groups peers by (cluster, op_id) — hostnames must be unique within
/// one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerGroupKey {
    pub cluster: ClusterName,
    pub op_id: OperationId,
}

impl PeerGroupKey {
    pub fn new(cluster: ClusterName, op_id: OperationId) -> Self {
        Self { cluster, op_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub cpus: u32,
    pub memory_bytes: u64,
    pub kernel_version: String,
    pub docker_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPeer {
    pub addr: String,
    pub hostname: String,
    pub system_info: SystemInfo,
    pub provisioning_token: String,
    pub cluster: ClusterName,
    pub op_id: OperationId,
    pub joined_ts: DateTime<Utc>,
}

/// A single preflight-validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// One side of a bilateral ping-pong reachability/bandwidth probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPongTuple {
    pub addr: String,
    pub other_addrs: Vec<String>,
    pub port: u16,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPongResult {
    pub ok: bool,
    pub message: String,
}

/// Per-probe timeout is 2x the requested duration (§4.5); exceeding it
/// is a `LimitExceeded` error, not a `PingPongResult { ok: false }`.
pub fn probe_timeout(requested: Duration) -> Duration {
    requested * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_timeout_is_double_the_requested_duration() {
        assert_eq!(probe_timeout(Duration::from_secs(5)), Duration::from_secs(10));
    }

    #[test]
    fn peer_group_key_equality_ignores_field_order() {
        let cluster = ClusterName::new("c1");
        let op = OperationId::new();
        let a = PeerGroupKey::new(cluster.clone(), op);
        let b = PeerGroupKey::new(cluster, op);
        assert_eq!(a, b);
    }
}
