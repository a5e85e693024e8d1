use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stratum::api::{build_install_plan, Engine, EngineConfig};
use stratum::cli::{Cli, Commands};
use stratum::collaborators::RemoteClusterCollaborators;
use stratum::config::Config;
use stratum::errors::CliError;
use stratum::fleet::{AgentFleetCoordinator, AgentFleetServerImpl, TonicRemoteShell};
use stratum::manifest::ApplicationManifest;
use stratum_common::errors::OpeResult;
use stratum_common::executors::ExecutorRegistry;
use stratum_common::ids::ClusterName;
use stratum_common::operation::OperationState;
use stratum_common::plan::OperationType;
use stratum_common::store::LocalStore;
use stratum_proto::agent_fleet_server::AgentFleetServer;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), cli.verbose).context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let exit_code = match run(cli, config).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    let cluster = ClusterName::new(cli.cluster.clone());
    let local_store = Arc::new(LocalStore::open(&config.local_store_path)?);
    let cluster_store = connect_cluster_store(&config.cluster_store_endpoint).await;

    let registry = Arc::new(ExecutorRegistry::standard());
    let remote_shell = Arc::new(TonicRemoteShell);
    let fleet = Arc::new(AgentFleetCoordinator::new(remote_shell, None));
    let collaborators = Arc::new(RemoteClusterCollaborators { fleet: fleet.clone() });
    spawn_fleet_server(fleet.clone(), &config.fleet_bind_addr)?;

    let engine = Engine::new(
        local_store,
        cluster_store,
        registry,
        collaborators,
        local_advertise_ip(),
        EngineConfig::default(),
    );

    match cli.command {
        Commands::Plan { operation_id, init, manifest, sync: _, repair, format } => {
            cmd_plan(&engine, &cluster, operation_id, init, manifest, repair, format).await
        }
        Commands::Execute { operation_id, phase: _, force: _ } => {
            let cancel = CancellationToken::new();
            let plan = engine.execute_phase(&cluster, operation_id, &cancel).await?;
            println!("{}", stratum::cli::OutputFormat::Text.render_plan(&plan));
            Ok(())
        }
        Commands::Rollback { operation_id, phase } => {
            let cancel = CancellationToken::new();
            engine.rollback_phase(&cluster, operation_id, &phase, &cancel).await?;
            Ok(())
        }
        Commands::Upgrade { operation_id, complete, phase } => cmd_upgrade(&engine, &cluster, operation_id, complete, phase).await,
    }
}

/// Starts the `AgentFleet::Join` listener in the background so agents
/// can register against this process while it also drives the CLI
/// command that was invoked.
fn spawn_fleet_server(coordinator: Arc<AgentFleetCoordinator>, bind_addr: &str) -> Result<(), CliError> {
    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|_| CliError::Ope(stratum_common::errors::OpeError::BadParameter { message: format!("invalid fleet_bind_addr {bind_addr}") }))?;

    tokio::spawn(async move {
        let service = AgentFleetServerImpl { coordinator };
        if let Err(err) = tonic::transport::Server::builder().add_service(AgentFleetServer::new(service)).serve(addr).await {
            tracing::error!(%err, "fleet coordinator server exited");
        }
    });
    Ok(())
}

async fn connect_cluster_store(endpoint: &str) -> Option<Arc<dyn stratum_common::store::PlanStore>> {
    let backend = stratum::store::ClusterStoreBackend::connect(endpoint.to_string()).await.ok()?;
    Some(Arc::new(backend))
}

fn local_advertise_ip() -> String {
    std::env::var("STRATUM_ADVERTISE_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
}

async fn cmd_plan(
    engine: &Engine,
    cluster: &ClusterName,
    operation_id: Option<stratum_common::ids::OperationId>,
    init: bool,
    manifest_path: Option<std::path::PathBuf>,
    repair: bool,
    format: stratum::cli::OutputFormat,
) -> Result<(), CliError> {
    if init {
        let path = manifest_path.ok_or_else(|| {
            CliError::Ope(stratum_common::errors::OpeError::BadParameter { message: "plan --init requires --manifest".into() })
        })?;
        let raw = std::fs::read_to_string(&path).map_err(|source| CliError::ManifestRead { path: path.clone(), source })?;
        let manifest: ApplicationManifest = serde_yaml::from_str(&raw).map_err(|source| CliError::ManifestParse { path, source })?;

        let record = engine.create_operation(cluster.clone(), "default", OperationType::Install).await?;
        let plan = build_install_plan(record.id, cluster.clone(), "default", &manifest, 3);
        engine.create_operation_plan(&plan).await?;
        engine.update_operation_state(cluster, record.id, OperationState::Created, OperationState::Ready).await?;
        println!("{}", format.render_operation(&record));
        return Ok(());
    }

    let op_id = match operation_id {
        Some(id) => id,
        None => {
            engine
                .get_operation(cluster, None)
                .await?
                .ok_or_else(|| CliError::Ope(stratum_common::errors::OpeError::PlanNotFound { op_id: stratum_common::ids::OperationId::new() }))?
                .id
        }
    };

    let plan = engine.get_operation_plan(cluster, op_id).await?;

    if repair {
        repair_failed_phases(engine, cluster, op_id, &plan).await?;
    }

    println!("{}", format.render_plan(&plan));
    Ok(())
}

async fn repair_failed_phases(
    engine: &Engine,
    cluster: &ClusterName,
    op_id: stratum_common::ids::OperationId,
    plan: &stratum_common::plan::Plan,
) -> OpeResult<()> {
    let cancel = CancellationToken::new();
    for phase in plan.flatten() {
        if phase.is_leaf() && phase.state == stratum_common::plan::PhaseState::Failed {
            engine.rollback_phase(cluster, op_id, &phase.id, &cancel).await?;
        }
    }
    Ok(())
}

async fn cmd_upgrade(
    engine: &Engine,
    cluster: &ClusterName,
    operation_id: stratum_common::ids::OperationId,
    complete: bool,
    phase: Option<stratum_common::ids::PhaseId>,
) -> Result<(), CliError> {
    let cancel = CancellationToken::new();

    if let Some(phase) = phase {
        engine.rollback_phase(cluster, operation_id, &phase, &cancel).await?;
        return Ok(());
    }

    let plan = engine.execute_phase(cluster, operation_id, &cancel).await?;
    if complete {
        let err = if plan.has_failed() { Some("upgrade subplan has a failed phase".to_string()) } else { None };
        engine.complete_operation(cluster, operation_id, err).await?;
    }
    println!("{}", stratum::cli::OutputFormat::Text.render_plan(&plan));
    Ok(())
}
