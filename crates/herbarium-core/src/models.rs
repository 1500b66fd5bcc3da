// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data model for the deployment catalog.
//!
//! A *stem* is a deployed service version; a *leaf* is one running process
//! instance of it. An idle stem carries a *graft node* placeholder instead of
//! real leaves until the first request arrives.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a deployed service version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StemKey {
    /// Service name.
    pub name: String,
    /// Deployed version.
    pub version: String,
}

impl StemKey {
    /// Create a key from a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for StemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Where a stem's configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StemType {
    /// Platform component under `<root>/system/`.
    System,
    /// User deployment under `<root>/services/`.
    Deployment,
}

/// Status of a leaf instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafStatus {
    /// The leaf process is starting.
    Starting,
    /// The leaf is running and bound into HAProxy.
    Running,
    /// The leaf is being stopped.
    Stopping,
    /// The status cannot be determined.
    Unknown,
}

impl fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeafStatus::Starting => "STARTING",
            LeafStatus::Running => "RUNNING",
            LeafStatus::Stopping => "STOPPING",
            LeafStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One running process instance of a stem.
#[derive(Debug, Clone)]
pub struct Leaf {
    /// Globally unique leaf identifier.
    pub id: String,
    /// Process ID of the running leaf. Zero for graft nodes, whose listener
    /// lives inside the runtime process.
    pub pid: u32,
    /// HAProxy server name inside the stem's backend.
    pub haproxy_server: String,
    /// Port the leaf listens on.
    pub port: u16,
    /// Current status.
    pub status: LeafStatus,
    /// When the leaf was initialized.
    pub initialized: DateTime<Utc>,
}

/// A deployed service version together with its running instances.
#[derive(Debug, Clone)]
pub struct Stem {
    /// Service name.
    pub name: String,
    /// Whether the stem is a system component or a user deployment.
    pub stem_type: StemType,
    /// The path-prefix route this stem serves, e.g. `/hello`.
    pub working_url: String,
    /// HAProxy backend name: the working URL without its leading slash.
    pub haproxy_backend: String,
    /// Deployed version.
    pub version: String,
    /// Environment variables applied to every leaf of this stem.
    pub environment: HashMap<String, String>,
    /// Active leaf instances keyed by leaf ID.
    pub leaf_instances: HashMap<String, Leaf>,
    /// Placeholder leaf standing in while no real instances exist.
    pub graft_node_leaf: Option<Leaf>,
    /// Parsed service configuration.
    pub config: StemConfig,
}

impl Stem {
    /// The catalog key of this stem.
    pub fn key(&self) -> StemKey {
        StemKey::new(self.name.clone(), self.version.clone())
    }
}

/// A declared dependency of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDependency {
    /// Dependency name.
    pub name: String,
    /// Dependency schema.
    pub schema: String,
}

/// Service configuration parsed from a `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemConfig {
    /// Service name.
    pub name: String,
    /// The path-prefix route, e.g. `/hello`.
    pub url: String,
    /// Command template used to start an instance. May contain `{PORT}`.
    pub command: String,
    /// Environment variables for the instance. Values may contain `{PORT}`.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Declared service dependencies.
    #[serde(default)]
    pub dependencies: Vec<ServiceDependency>,
    /// Deployed version.
    pub version: String,
    /// Number of instances to keep warm. `None` installs a graft node
    /// instead; `Some(0)` starts nothing at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,
    /// Substring on stdout/stderr that marks the instance as ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_message: Option<String>,
}

/// Global platform configuration from `<root>/system/herbarium/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Platform folders.
    pub plantarium: PlantariumSection,
    /// HAProxy Data Plane API access.
    pub haproxy: HaproxySection,
    /// API security settings.
    #[serde(default)]
    pub security: SecuritySection,
}

/// The `plantarium` section of the global config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantariumSection {
    /// Root folder holding `system/` and `services/`.
    pub root_folder: String,
    /// Folder for per-leaf log files.
    #[serde(default)]
    pub log_folder: Option<String>,
}

/// The `haproxy` section of the global config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaproxySection {
    /// Base URL of the Data Plane API.
    pub url: String,
    /// Basic auth user.
    pub login: String,
    /// Basic auth password.
    pub password: String,
}

/// The `security` section of the global config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecuritySection {
    /// API key for inbound management calls.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Generate a unique leaf ID for a stem: `<name>-<version>-<unix-nanos>`.
pub fn leaf_id(name: &str, version: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}-{}-{}", name, version, nanos)
}

/// The distinguished graft-node ID for a stem: `<name>-<version>-graftnode`.
pub fn graft_node_id(name: &str, version: &str) -> String {
    format!("{}-{}-graftnode", name, version)
}

/// Derive the HAProxy backend name from a working URL.
pub fn backend_name(url: &str) -> String {
    url.trim_start_matches('/').to_string()
}
