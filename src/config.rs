//! Operator-process configuration (C0b), distinct from
//! [`stratum_common::config::EnvKnobs`]: this is how the `stratum`
//! binary itself is configured (where its local store lives, which
//! cluster-store endpoint to dial), not the retry/timeout knobs the
//! FSM consults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings loadable from a TOML file and overridable by environment
/// variable, in that order (file wins over default, env wins over file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the local per-node sqlite store.
    pub local_store_path: PathBuf,
    /// gRPC endpoint of the cluster-replicated store, e.g. `http://10.0.0.1:2390`.
    pub cluster_store_endpoint: String,
    /// Directory the manifest/operation CLI commands resolve relative paths against.
    pub working_dir: PathBuf,
    /// Socket the fleet coordinator's `AgentFleet::Join` service binds to.
    pub fleet_bind_addr: String,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_store_path: PathBuf::from("/var/lib/stratum/local.sqlite3"),
            cluster_store_endpoint: "http://127.0.0.1:2390".to_string(),
            working_dir: PathBuf::from("."),
            fleet_bind_addr: "0.0.0.0:7000".to_string(),
            verbose: false,
        }
    }
}

impl Config {
    /// Loads `path` if it exists (TOML), falling back to defaults, then
    /// applies `STRATUM_LOCAL_STORE_PATH`/`STRATUM_CLUSTER_STORE_ENDPOINT`
    /// overrides. `verbose` always reflects the CLI flag, not the file.
    pub fn load(path: Option<&Path>, verbose: bool) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file at {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("failed to parse config file at {}", path.display()))?
            }
            _ => Config::default(),
        };

        if let Ok(value) = std::env::var("STRATUM_LOCAL_STORE_PATH") {
            config.local_store_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("STRATUM_CLUSTER_STORE_ENDPOINT") {
            config.cluster_store_endpoint = value;
        }
        if let Ok(value) = std::env::var("STRATUM_FLEET_BIND_ADDR") {
            config.fleet_bind_addr = value;
        }
        config.verbose = verbose;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_with_no_file_returns_defaults() {
        let config = Config::load(None, true).unwrap();
        assert_eq!(config.cluster_store_endpoint, "http://127.0.0.1:2390");
        assert!(config.verbose);
    }

    #[test]
    fn load_reads_overrides_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stratum.toml");
        std::fs::write(&path, "cluster_store_endpoint = \"http://10.0.0.9:2390\"\nlocal_store_path = \"/tmp/local.sqlite3\"\nworking_dir = \".\"\nverbose = false\n").unwrap();
        let config = Config::load(Some(&path), false).unwrap();
        assert_eq!(config.cluster_store_endpoint, "http://10.0.0.9:2390");
    }

    #[test]
    fn env_var_overrides_file_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stratum.toml");
        std::fs::write(&path, "cluster_store_endpoint = \"http://10.0.0.9:2390\"\nlocal_store_path = \"/tmp/local.sqlite3\"\nworking_dir = \".\"\nverbose = false\n").unwrap();
        unsafe {
            std::env::set_var("STRATUM_CLUSTER_STORE_ENDPOINT", "http://10.0.0.42:2390");
        }
        let config = Config::load(Some(&path), false).unwrap();
        assert_eq!(config.cluster_store_endpoint, "http://10.0.0.42:2390");
        unsafe {
            std::env::remove_var("STRATUM_CLUSTER_STORE_ENDPOINT");
        }
    }
}
