//! Production [`ClusterCollaborators`]: every call is a shell command
//! run on the target server's agent via the fleet coordinator's
//! `Exec` RPC (§6's "stream-oriented RPC to remote agents" is the only
//! wire protocol the core assumes here).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use stratum_common::errors::{OpeError, OpeResult};
use stratum_common::executors::{ClusterCollaborators, EtcdUnit};
use stratum_common::plan::ServerSpec;
use tokio::sync::mpsc;

use crate::fleet::AgentFleetCoordinator;

pub struct RemoteClusterCollaborators {
    pub fleet: std::sync::Arc<AgentFleetCoordinator>,
}

impl RemoteClusterCollaborators {
    async fn run(&self, addr: &str, argv: Vec<&str>) -> OpeResult<String> {
        let (tx, mut rx) = mpsc::channel(32);
        let argv: Vec<String> = argv.into_iter().map(str::to_string).collect();
        self.fleet.exec(addr, argv, tx).await?;

        let mut stdout = Vec::new();
        let mut failed = false;
        while let Some(chunk) = rx.recv().await {
            if !chunk.stderr {
                stdout.extend_from_slice(&chunk.data);
            }
            if let Some(code) = chunk.exit_code {
                failed = code != 0;
            }
        }
        if failed {
            return Err(OpeError::ExecutorFatal { executor: "remote-exec".into(), message: format!("command on {addr} exited non-zero") });
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

#[async_trait]
impl ClusterCollaborators for RemoteClusterCollaborators {
    async fn install_package(&self, server: &ServerSpec, locator: &str) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["stratum-pkg", "install", locator]).await.map(|_| ())
    }

    async fn remove_package(&self, server: &ServerSpec, locator: &str) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["stratum-pkg", "remove", locator]).await.map(|_| ())
    }

    async fn wait_for_runtime(&self, timeout: Duration) -> OpeResult<()> {
        tokio::time::timeout(timeout, self.run("localhost", vec!["stratum-runtime", "wait"]))
            .await
            .map_err(|_| OpeError::LimitExceeded { what: "waiting for the runtime to become ready".into() })?
            .map(|_| ())
    }

    async fn apply_rbac(&self) -> OpeResult<()> {
        self.run("localhost", vec!["stratum-runtime", "apply-rbac"]).await.map(|_| ())
    }

    async fn apply_resources(&self, manifests: &[String]) -> OpeResult<()> {
        let mut argv = vec!["stratum-runtime".to_string(), "apply".to_string()];
        argv.extend(manifests.iter().cloned());
        let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
        self.run("localhost", argv_refs).await.map(|_| ())
    }

    async fn populate_registry(&self, server: &ServerSpec) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["stratum-registry", "populate"]).await.map(|_| ())
    }

    async fn set_election_participation(&self, server: &ServerSpec, enabled: bool) -> OpeResult<()> {
        let flag = if enabled { "--enable" } else { "--disable" };
        self.run(&server.advertise_ip, vec!["stratum-runtime", "election", flag]).await.map(|_| ())
    }

    async fn drain_node(&self, server: &ServerSpec, timeout: Duration) -> OpeResult<()> {
        tokio::time::timeout(timeout, self.run("localhost", vec!["stratum-runtime", "drain", &server.hostname]))
            .await
            .map_err(|_| OpeError::LimitExceeded { what: format!("draining {}", server.hostname) })?
            .map(|_| ())
    }

    async fn remove_state_dir(&self, server: &ServerSpec) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["rm", "-rf", &server.state_dir]).await.map(|_| ())
    }

    async fn gc_unreferenced_blobs(&self) -> OpeResult<()> {
        self.run("localhost", vec!["stratum-pkg", "gc"]).await.map(|_| ())
    }

    async fn rewrite_envars(&self, server: &ServerSpec, vars: &HashMap<String, String>) -> OpeResult<()> {
        let mut argv = vec!["stratum-runtime".to_string(), "set-envars".to_string()];
        argv.extend(vars.iter().map(|(k, v)| format!("{k}={v}")));
        let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
        self.run(&server.advertise_ip, argv_refs).await.map(|_| ())
    }

    async fn etcd_backup(&self, server: &ServerSpec) -> OpeResult<String> {
        self.run(&server.advertise_ip, vec!["stratum-etcd", "backup"]).await
    }

    async fn etcd_set_unit_enabled(&self, server: &ServerSpec, unit: EtcdUnit, enabled: bool) -> OpeResult<()> {
        let unit_name = match unit {
            EtcdUnit::Main => "stratum-etcd.service",
            EtcdUnit::Upgrade => "stratum-etcd-upgrade.service",
        };
        let verb = if enabled { "enable" } else { "disable" };
        self.run(&server.advertise_ip, vec!["systemctl", verb, "--now", unit_name]).await.map(|_| ())
    }

    async fn etcd_swap_data_dir(&self, server: &ServerSpec) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["stratum-etcd", "swap-data-dir"]).await.map(|_| ())
    }

    async fn etcd_restore(&self, server: &ServerSpec, backup_path: &str) -> OpeResult<()> {
        self.run(&server.advertise_ip, vec!["stratum-etcd", "restore", backup_path]).await.map(|_| ())
    }

    async fn restart_cluster_controller(&self) -> OpeResult<()> {
        self.run("localhost", vec!["stratum-runtime", "restart-controller"]).await.map(|_| ())
    }
}
