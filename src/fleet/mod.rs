//! The Agent Fleet Coordinator (C5). Agents dial the coordinator's
//! `AgentFleet::Join`; the coordinator then dials back into each
//! registered peer for `Exec`/`Validate`/`CheckPorts`/`CheckBandwidth`.

mod license;
mod server;

pub use license::{LicenseLimits, enforce_license};
pub use server::AgentFleetServerImpl;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use stratum_common::errors::{OpeError, OpeResult};
use stratum_common::fleet::{AgentPeer, PeerGroupKey, PingPongResult, PingPongTuple, Probe, SystemInfo, probe_timeout};
use stratum_common::ids::{ClusterName, OperationId};
use stratum_proto::{AgentFleetClient, ExecChunk, PingPongRequest, PingPongTuple as WirePingPongTuple, ValidateRequest};
use tokio::sync::{broadcast, mpsc, Mutex};
use tonic::transport::Channel;

/// Dials an agent addressed by `addr`. Implemented over `tonic` in
/// production; swappable for tests.
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    async fn dial(&self, addr: &str) -> OpeResult<AgentFleetClient<Channel>>;
}

pub struct TonicRemoteShell;

#[async_trait::async_trait]
impl RemoteShell for TonicRemoteShell {
    async fn dial(&self, addr: &str) -> OpeResult<AgentFleetClient<Channel>> {
        AgentFleetClient::connect(addr.to_string())
            .await
            .map_err(|source| OpeError::TransientUnavailable { message: source.to_string() })
    }
}

struct PeerGroupInner {
    peers: Vec<AgentPeer>,
    watch: broadcast::Sender<AgentPeer>,
}

impl PeerGroupInner {
    fn new() -> Self {
        let (watch, _) = broadcast::channel(32);
        Self { peers: Vec::new(), watch }
    }
}

pub struct AgentFleetCoordinator {
    groups: DashMap<PeerGroupKey, Arc<Mutex<PeerGroupInner>>>,
    remote_shell: Arc<dyn RemoteShell>,
    license: Option<LicenseLimits>,
}

impl AgentFleetCoordinator {
    pub fn new(remote_shell: Arc<dyn RemoteShell>, license: Option<LicenseLimits>) -> Self {
        Self { groups: DashMap::new(), remote_shell, license }
    }

    fn group(&self, key: &PeerGroupKey) -> Arc<Mutex<PeerGroupInner>> {
        self.groups.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(PeerGroupInner::new()))).clone()
    }

    /// Registers a peer. Rejects a duplicate hostname within the group
    /// and enforces the license cap if one is configured.
    pub async fn join(
        &self,
        cluster: ClusterName,
        op_id: OperationId,
        addr: String,
        hostname: String,
        provisioning_token: String,
        system_info: SystemInfo,
    ) -> OpeResult<()> {
        let key = PeerGroupKey::new(cluster.clone(), op_id);
        let group = self.group(&key);
        let mut inner = group.lock().await;

        if inner.peers.iter().any(|p| p.hostname == hostname) {
            return Err(OpeError::DuplicateHostname { hostname });
        }

        if let Some(license) = &self.license {
            enforce_license(license, inner.peers.len(), &system_info)?;
        }

        let peer = AgentPeer { addr, hostname, system_info, provisioning_token, cluster, op_id, joined_ts: chrono::Utc::now() };
        inner.peers.push(peer.clone());
        let _ = inner.watch.send(peer);
        Ok(())
    }

    /// Blocks until `n` peers are present in the group.
    pub async fn wait(&self, key: &PeerGroupKey, n: usize, timeout: Duration) -> OpeResult<()> {
        let group = self.group(key);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let inner = group.lock().await;
                if inner.peers.len() >= n {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OpeError::LimitExceeded { what: format!("waiting for {n} peers in group") });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn peers(&self, key: &PeerGroupKey) -> Vec<AgentPeer> {
        self.group(key).lock().await.peers.clone()
    }

    /// Selects an eligible master peer: `role == master` and, if
    /// `advertise_ip` is given, a hostname match on that ip. Fails
    /// `NotFound` if none qualifies.
    pub fn select_leader<'a>(&self, peers: &'a [AgentPeer], masters: &[&str], advertise_ip: Option<&str>) -> OpeResult<&'a AgentPeer> {
        peers
            .iter()
            .find(|p| masters.contains(&p.hostname.as_str()) && advertise_ip.map(|ip| p.addr.starts_with(ip)).unwrap_or(true))
            .ok_or(OpeError::NoEligibleLeader { op_id: peers.first().map(|p| p.op_id).unwrap_or_default() })
    }

    pub async fn exec(&self, addr: &str, argv: Vec<String>, out: mpsc::Sender<ExecChunk>) -> OpeResult<()> {
        let mut client = self.remote_shell.dial(addr).await?;
        let request = stratum_proto::ExecRequest { addr: addr.to_string(), argv };
        let mut stream = client.exec(request).await?.into_inner();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if out.send(chunk).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    pub async fn validate(&self, addr: &str, manifest: Vec<u8>, profile: String) -> OpeResult<Vec<Probe>> {
        let mut client = self.remote_shell.dial(addr).await?;
        let response = client.validate(ValidateRequest { addr: addr.to_string(), manifest, profile }).await?.into_inner();
        Ok(response.probes.into_iter().map(Into::into).collect())
    }

    async fn ping_pong(&self, addr: &str, tuples: Vec<PingPongTuple>) -> OpeResult<HashMap<String, PingPongResult>> {
        let mut client = self.remote_shell.dial(addr).await?;
        let longest = tuples.iter().map(|t| t.duration).max().unwrap_or_default();
        let wire_tuples: Vec<WirePingPongTuple> = tuples.iter().map(Into::into).collect();
        let call = client.check_ports(PingPongRequest { tuples: wire_tuples });
        let response = tokio::time::timeout(probe_timeout(longest), call)
            .await
            .map_err(|_| OpeError::LimitExceeded { what: format!("ping-pong probe to {addr}") })??
            .into_inner();
        Ok(response.results.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    pub async fn check_ports(&self, addr: &str, tuples: Vec<PingPongTuple>) -> OpeResult<HashMap<String, PingPongResult>> {
        self.ping_pong(addr, tuples).await
    }

    pub async fn check_bandwidth(&self, addr: &str, tuples: Vec<PingPongTuple>) -> OpeResult<HashMap<String, PingPongResult>> {
        self.ping_pong(addr, tuples).await
    }

    pub async fn shutdown(&self, key: &PeerGroupKey) -> OpeResult<()> {
        let peers = self.peers(key).await;
        for peer in peers {
            let mut client = self.remote_shell.dial(&peer.addr).await?;
            client
                .shutdown(stratum_proto::ShutdownRequest { cluster: key.cluster.as_str().to_string(), op_id: key.op_id.as_uuid().to_string() })
                .await?;
        }
        self.groups.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRemoteShell;

    #[async_trait::async_trait]
    impl RemoteShell for NoopRemoteShell {
        async fn dial(&self, _addr: &str) -> OpeResult<AgentFleetClient<Channel>> {
            Err(OpeError::TransientUnavailable { message: "test double has no real transport".into() })
        }
    }

    fn system_info(cpus: u32) -> SystemInfo {
        SystemInfo { hostname: "h1".into(), cpus, memory_bytes: 0, kernel_version: String::new(), docker_version: String::new() }
    }

    #[tokio::test]
    async fn duplicate_hostname_is_rejected() {
        let coordinator = AgentFleetCoordinator::new(Arc::new(NoopRemoteShell), None);
        let cluster = ClusterName::new("c1");
        let op_id = OperationId::new();
        coordinator.join(cluster.clone(), op_id, "10.0.0.1:7000".into(), "h1".into(), "tok".into(), system_info(4)).await.unwrap();
        let result = coordinator.join(cluster, op_id, "10.0.0.2:7000".into(), "h1".into(), "tok".into(), system_info(4)).await;
        assert!(matches!(result, Err(OpeError::DuplicateHostname { .. })));
    }

    #[tokio::test]
    async fn wait_succeeds_once_enough_peers_have_joined() {
        let coordinator = AgentFleetCoordinator::new(Arc::new(NoopRemoteShell), None);
        let cluster = ClusterName::new("c1");
        let op_id = OperationId::new();
        let key = PeerGroupKey::new(cluster.clone(), op_id);
        coordinator.join(cluster, op_id, "10.0.0.1:7000".into(), "h1".into(), "tok".into(), system_info(4)).await.unwrap();
        coordinator.wait(&key, 1, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_when_too_few_peers_join() {
        let coordinator = AgentFleetCoordinator::new(Arc::new(NoopRemoteShell), None);
        let key = PeerGroupKey::new(ClusterName::new("c1"), OperationId::new());
        let result = coordinator.wait(&key, 2, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(OpeError::LimitExceeded { .. })));
    }

    #[test]
    fn select_leader_requires_master_role() {
        let coordinator = AgentFleetCoordinator::new(Arc::new(NoopRemoteShell), None);
        let op_id = OperationId::new();
        let peer = AgentPeer {
            addr: "10.0.0.1:7000".into(),
            hostname: "n1".into(),
            system_info: system_info(4),
            provisioning_token: "tok".into(),
            cluster: ClusterName::new("c1"),
            op_id,
            joined_ts: chrono::Utc::now(),
        };
        let result = coordinator.select_leader(&[peer], &["m1"], None);
        assert!(matches!(result, Err(OpeError::NoEligibleLeader { .. })));
    }
}
