//! CLI-facing error wrapper for the stratum operator binary.
//!
//! Every fallible command funnels its error through [`CliError`], whose
//! [`CliError::exit_code`] implements the exit-code table from the
//! external-interfaces design: success is 0, everything else is the
//! matching [`ErrorClass`] ordinal.

use stratum_common::errors::{ErrorClass, OpeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Ope(#[from] OpeError),

    #[error("failed to read manifest at {path}: {source}")]
    ManifestRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}: {source}")]
    ManifestParse {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to connect to the cluster store: {0}")]
    StoreUnavailable(#[source] tonic::transport::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CliError::Ope(err) => err.classify(),
            CliError::ManifestRead { .. } | CliError::ManifestParse { .. } => ErrorClass::BadParameter,
            CliError::StoreUnavailable(_) => ErrorClass::Transient,
            CliError::Other(_) => ErrorClass::Fatal,
        }
    }

    /// Process exit code per the CLI's documented mapping: 0 on
    /// success, 1 for a fatal/unclassified error, 2-7 for the other
    /// six `ErrorClass` members in the order they're declared.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Fatal => 1,
            ErrorClass::BadParameter => 2,
            ErrorClass::NotFound => 3,
            ErrorClass::AlreadyExists => 4,
            ErrorClass::AccessDenied => 5,
            ErrorClass::LimitExceeded => 6,
            ErrorClass::Transient => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_common::ids::OperationId;

    #[test]
    fn not_found_maps_to_exit_code_three() {
        let err = CliError::Ope(OpeError::PlanNotFound { op_id: OperationId::new() });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn other_errors_are_fatal() {
        let err = CliError::Other(anyhow::anyhow!("boom"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn manifest_parse_failure_is_a_bad_parameter() {
        let source = serde_yaml::from_str::<serde_yaml::Value>("not: valid: yaml: :").unwrap_err();
        let err = CliError::ManifestParse { path: "/tmp/manifest.yaml".into(), source };
        assert_eq!(err.class(), ErrorClass::BadParameter);
        assert_eq!(err.exit_code(), 2);
    }
}
