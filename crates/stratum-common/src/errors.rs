//! Typed error hierarchy for the Operation Plan Engine.
//!
//! `OpeError` is the one error type that crosses every subsystem
//! boundary — plan store, builder, FSM, fleet coordinator, reconciler.
//! `classify` maps any error, including ones that crossed the gRPC
//! boundary as a `tonic::Status`, back onto the seven-member taxonomy
//! so the FSM's retry logic and the CLI's exit-code mapping share one
//! source of truth.

use thiserror::Error;

use crate::ids::{ChangeId, OperationId, PhaseId};

/// The seven error classes from the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    AlreadyExists,
    BadParameter,
    AccessDenied,
    LimitExceeded,
    Transient,
    Fatal,
}

impl ErrorClass {
    /// Whether the FSM should retry an executor call that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

#[derive(Debug, Error)]
pub enum OpeError {
    #[error("plan for operation {op_id} not found")]
    PlanNotFound { op_id: OperationId },

    #[error("phase {phase} not found in plan for operation {op_id}")]
    PhaseNotFound { op_id: OperationId, phase: PhaseId },

    #[error("peer with hostname {hostname} not found in group")]
    PeerNotFound { hostname: String },

    #[error("no eligible leader agent available for operation {op_id}")]
    NoEligibleLeader { op_id: OperationId },

    #[error("operation already exists for cluster {cluster}")]
    OperationAlreadyExists { cluster: String },

    #[error("peer with hostname {hostname} already registered in group")]
    DuplicateHostname { hostname: String },

    #[error("duplicate change {change_id} for phase {phase}")]
    DuplicateChange { change_id: ChangeId, phase: PhaseId },

    #[error("invalid parameter: {message}")]
    BadParameter { message: String },

    #[error("illegal phase state transition for {phase}: {from:?} -> {to:?}")]
    IllegalTransition {
        phase: PhaseId,
        from: crate::plan::PhaseState,
        to: crate::plan::PhaseState,
    },

    #[error("rollback of {phase} is illegal: dependent {dependent} is not rolled back")]
    IllegalRollback { phase: PhaseId, dependent: PhaseId },

    #[error("authentication failed for provisioning token")]
    AccessDenied,

    #[error("license limit exceeded: {message}")]
    LicenseLimitExceeded { message: String },

    #[error("timed out waiting for {what}")]
    LimitExceeded { what: String },

    #[error("cluster store is transiently unavailable: {message}")]
    TransientUnavailable { message: String },

    #[error("executor {executor} reported a transient error: {message}")]
    ExecutorTransient { executor: String, message: String },

    #[error("executor {executor} reported a fatal error: {message}")]
    ExecutorFatal { executor: String, message: String },

    #[error("local changelog store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC call failed: {0}")]
    Grpc(#[from] Box<tonic::Status>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<tonic::Status> for OpeError {
    fn from(status: tonic::Status) -> Self {
        OpeError::Grpc(Box::new(status))
    }
}

impl OpeError {
    /// Classify this error onto the seven-member taxonomy from the
    /// error-handling design. Used by the FSM to decide whether to
    /// retry and by the CLI to compute a process exit code.
    pub fn classify(&self) -> ErrorClass {
        match self {
            OpeError::PlanNotFound { .. }
            | OpeError::PhaseNotFound { .. }
            | OpeError::PeerNotFound { .. }
            | OpeError::NoEligibleLeader { .. } => ErrorClass::NotFound,

            OpeError::OperationAlreadyExists { .. } | OpeError::DuplicateHostname { .. } => {
                ErrorClass::AlreadyExists
            }

            OpeError::DuplicateChange { .. } => ErrorClass::AlreadyExists,

            OpeError::BadParameter { .. } | OpeError::IllegalTransition { .. } | OpeError::IllegalRollback { .. } => {
                ErrorClass::BadParameter
            }

            OpeError::AccessDenied => ErrorClass::AccessDenied,

            OpeError::LicenseLimitExceeded { .. } | OpeError::LimitExceeded { .. } => {
                ErrorClass::LimitExceeded
            }

            OpeError::TransientUnavailable { .. } | OpeError::ExecutorTransient { .. } => {
                ErrorClass::Transient
            }

            OpeError::ExecutorFatal { .. } | OpeError::Sqlite(_) | OpeError::Io(_) | OpeError::Other(_) => {
                ErrorClass::Fatal
            }

            OpeError::Grpc(status) => classify_grpc(status),
        }
    }
}

fn classify_grpc(status: &tonic::Status) -> ErrorClass {
    use tonic::Code;
    match status.code() {
        Code::NotFound => ErrorClass::NotFound,
        Code::AlreadyExists => ErrorClass::AlreadyExists,
        Code::InvalidArgument => ErrorClass::BadParameter,
        Code::Unauthenticated | Code::PermissionDenied => ErrorClass::AccessDenied,
        Code::DeadlineExceeded | Code::ResourceExhausted => ErrorClass::LimitExceeded,
        Code::Unavailable | Code::Aborted => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

pub type OpeResult<T> = Result<T, OpeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_hostname_classifies_as_already_exists() {
        let err = OpeError::DuplicateHostname {
            hostname: "node-1".into(),
        };
        assert_eq!(err.classify(), ErrorClass::AlreadyExists);
    }

    #[test]
    fn transient_unavailable_is_retryable() {
        let err = OpeError::TransientUnavailable {
            message: "etcd unreachable".into(),
        };
        assert_eq!(err.classify(), ErrorClass::Transient);
        assert!(err.classify().is_retryable());
    }

    #[test]
    fn grpc_unavailable_classifies_as_transient() {
        let status = tonic::Status::unavailable("connection refused");
        let err: OpeError = status.into();
        assert_eq!(err.classify(), ErrorClass::Transient);
    }

    #[test]
    fn grpc_not_found_classifies_as_not_found() {
        let status = tonic::Status::not_found("no such peer");
        let err: OpeError = status.into();
        assert_eq!(err.classify(), ErrorClass::NotFound);
    }

    #[test]
    fn bad_parameter_is_not_retryable() {
        let err = OpeError::BadParameter {
            message: "missing advertise ip".into(),
        };
        assert!(!err.classify().is_retryable());
    }
}
