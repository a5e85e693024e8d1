//! The application manifest the plan builder (C2) consumes: node
//! profiles, dependency packages and optional hooks. This is distinct
//! from the operator's own [`crate::config::Config`] — the manifest
//! describes what to install, the config describes how the operator
//! itself runs.

use serde::{Deserialize, Serialize};
use stratum_common::plan::PackageLocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileRole {
    Master,
    Node,
}

/// A server as named by the manifest, before the builder's
/// server-classification step (§4.2) runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub hostname: String,
    pub advertise_ip: String,
    pub role: ProfileRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationManifest {
    pub profiles: Vec<NodeProfile>,
    pub app_package: PackageLocator,
    pub runtime_package: PackageLocator,
    pub dependencies: Vec<PackageLocator>,
    #[serde(default)]
    pub optional_components: Vec<String>,
    #[serde(default)]
    pub resource_manifests: Vec<String>,
    #[serde(default)]
    pub installer_hook: Option<String>,
    #[serde(default)]
    pub decrypt_hook: Option<String>,
}
