//! The `stratum` CLI surface (§6): `plan`, `execute`, `rollback`,
//! `upgrade`. Text output is unstable; JSON/YAML serialize the
//! resolved [`Plan`]/[`OperationRecord`] directly and are stable
//! contracts.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use stratum_common::ids::{OperationId, PhaseId};

#[derive(Parser)]
#[command(name = "stratum")]
#[command(version, about = "Cluster lifecycle orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, env = "STRATUM_CLUSTER")]
    pub cluster: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and print the operation plan, or set it up / repair it.
    Plan {
        #[arg(long)]
        operation_id: Option<OperationId>,
        /// Creates the operation and its plan from a manifest file.
        #[arg(long)]
        init: bool,
        #[arg(long, requires = "init")]
        manifest: Option<PathBuf>,
        /// Forces an out-of-cycle reconcile before resolving.
        #[arg(long)]
        sync: bool,
        /// Rolls back every failed phase eligible for automatic repair.
        #[arg(long)]
        repair: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Runs one phase (and its FSM dependents) to completion.
    Execute {
        #[arg(long)]
        operation_id: OperationId,
        #[arg(long)]
        phase: PhaseId,
        /// Executes even if prerequisite rollback is outstanding.
        #[arg(long)]
        force: bool,
    },
    /// Rolls back one phase.
    Rollback {
        #[arg(long)]
        operation_id: OperationId,
        #[arg(long)]
        phase: PhaseId,
    },
    /// Drives (or completes) the etcd-class store upgrade subplan.
    Upgrade {
        #[arg(long)]
        operation_id: OperationId,
        #[arg(long)]
        complete: bool,
        #[arg(long)]
        phase: Option<PhaseId>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn render_plan(&self, plan: &stratum_common::plan::Plan) -> String {
        match self {
            OutputFormat::Text => render_plan_text(plan),
            OutputFormat::Json => serde_json::to_string_pretty(plan).expect("Plan always serializes"),
            OutputFormat::Yaml => serde_yaml::to_string(plan).expect("Plan always serializes"),
        }
    }

    pub fn render_operation(&self, record: &stratum_common::operation::OperationRecord) -> String {
        match self {
            OutputFormat::Text => format!("operation {} [{}]: {:?}", record.id, record.cluster, record.state),
            OutputFormat::Json => serde_json::to_string_pretty(record).expect("OperationRecord always serializes"),
            OutputFormat::Yaml => serde_yaml::to_string(record).expect("OperationRecord always serializes"),
        }
    }
}

/// Highlights the first failed phase and its error chain, per §7's
/// "user-visible failure" rule.
fn render_plan_text(plan: &stratum_common::plan::Plan) -> String {
    let mut out = format!("operation {} ({:?})\n", plan.op_id, plan.operation_type);
    for phase in plan.flatten() {
        if !phase.is_leaf() {
            continue;
        }
        out.push_str(&format!("  {:<40} {:?}\n", phase.id.as_str(), phase.state));
    }
    if let Some(failed) = plan.flatten().into_iter().find(|p| p.is_leaf() && p.state == stratum_common::plan::PhaseState::Failed) {
        out.push_str(&format!("\nfirst failed phase: {} ({})\n", failed.id, failed.description));
    }
    out
}
