//! Shared domain types for the stratum cluster lifecycle orchestrator.
//!
//! This crate holds everything the operator process and the per-node
//! agent daemon both need: the plan/phase/changelog data model, the
//! operation record, the error taxonomy, environment knobs, the
//! phase-executor contract and registry (and its concrete
//! implementations), and the embedded local changelog store. Anything
//! that only the operator needs (the plan builder, the FSM, the fleet
//! coordinator, the gRPC cluster-store client) lives in the `stratum`
//! binary crate instead.

pub mod changelog;
pub mod config;
pub mod errors;
pub mod executors;
pub mod fleet;
pub mod ids;
pub mod operation;
pub mod plan;
pub mod store;

pub use errors::{ErrorClass, OpeError, OpeResult};
pub use ids::{ChangeId, ClusterName, OperationId, PhaseId};
