use std::net::SocketAddr;

use bollard::Docker;
use clap::Parser;
use stratum_agent::AgentServer;
use stratum_common::fleet::SystemInfo;
use stratum_common::ids::OperationId;
use stratum_proto::agent_fleet_server::AgentFleetServer;
use stratum_proto::{AgentFleetClient, JoinRequest};

/// Per-node daemon: registers with the fleet coordinator, then serves
/// the RPCs it dials back in for.
#[derive(Parser, Debug)]
#[command(name = "stratum-agent")]
struct Args {
    /// Coordinator address to join, e.g. http://10.0.0.1:7000.
    #[arg(long, env = "STRATUM_COORDINATOR_ADDR")]
    coordinator_addr: String,

    /// This node's own address, as the coordinator should dial it back.
    #[arg(long, env = "STRATUM_AGENT_ADDR")]
    agent_addr: String,

    /// Local socket to bind the agent's own gRPC server to.
    #[arg(long, env = "STRATUM_AGENT_BIND", default_value = "0.0.0.0:7001")]
    bind: SocketAddr,

    #[arg(long, env = "STRATUM_CLUSTER")]
    cluster: String,

    #[arg(long, env = "STRATUM_OPERATION_ID")]
    operation_id: OperationId,

    #[arg(long, env = "STRATUM_PROVISIONING_TOKEN", default_value = "")]
    provisioning_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let system_info = gather_system_info().await;
    join_coordinator(&args, system_info).await?;

    let (server, mut shutdown_rx) = AgentServer::new();
    tracing::info!(addr = %args.bind, "serving agent fleet rpcs");

    tonic::transport::Server::builder()
        .add_service(AgentFleetServer::new(server))
        .serve_with_shutdown(args.bind, async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn join_coordinator(args: &Args, system_info: SystemInfo) -> anyhow::Result<()> {
    let mut client = AgentFleetClient::connect(args.coordinator_addr.clone()).await?;
    let wire_system_info = (&system_info).into();
    client
        .join(JoinRequest {
            addr: args.agent_addr.clone(),
            hostname: system_info.hostname,
            provisioning_token: args.provisioning_token.clone(),
            cluster: args.cluster.clone(),
            op_id: args.operation_id.as_uuid().to_string(),
            system_info: Some(wire_system_info),
        })
        .await?;
    Ok(())
}

async fn gather_system_info() -> SystemInfo {
    let hostname = hostname_from_os();
    let cpus = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
    let docker_version = docker_version().await.unwrap_or_default();

    SystemInfo {
        hostname,
        cpus,
        memory_bytes: 0,
        kernel_version: std::env::consts::OS.to_string(),
        docker_version,
    }
}

fn hostname_from_os() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn docker_version() -> Option<String> {
    let docker = Docker::connect_with_local_defaults().ok()?;
    let info = docker.version().await.ok()?;
    info.version
}
