//! Container engine abstraction.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

use crate::types::Labels;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no such container: {id}")]
    NotFound { id: String },

    #[error("container name {name:?} is already in use by container {existing_id}")]
    Conflict { name: String, existing_id: String },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl BackendError {
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: i32,
}

/// Host-side settings of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub network_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub cpu_shares: Option<i64>,
    pub memory_swap: Option<i64>,
    pub oom_score_adj: Option<i32>,
    pub cgroup_parent: Option<String>,
    pub privileged: bool,
    pub readonly_rootfs: bool,
    pub security_opt: Vec<String>,
    pub sysctls: BTreeMap<String, String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub dns_options: Vec<String>,
    /// Keyed by `<port>/<proto>`, e.g. `80/tcp`.
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
}

/// Creation parameters for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerCreateConfig {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub labels: Labels,
    pub exposed_ports: BTreeSet<String>,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub remove_volumes: bool,
    pub force: bool,
}

/// Listing query. `labels` is a conjunctive exact-match filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include stopped containers.
    pub all: bool,
    pub id: Option<String>,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub labels: Labels,
    pub running: bool,
    /// Unix seconds.
    pub created: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    /// RFC 3339 creation time as reported by the engine.
    pub created: String,
    pub running: bool,
    pub pid: i64,
    pub labels: Labels,
    pub network_mode: String,
    pub ip_address: String,
    pub global_ipv6_address: String,
}

impl ContainerInspect {
    #[must_use]
    pub fn shares_host_network(&self) -> bool {
        self.network_mode == "host"
    }
}

/// Synchronous container engine client.
///
/// Every method must report a missing container as
/// [`BackendError::NotFound`], and a name collision on create as
/// [`BackendError::Conflict`].
pub trait ContainerBackend: Send + Sync {
    /// Engine API version, e.g. `1.41`.
    fn api_version(&self) -> Result<String, BackendError>;
    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), BackendError>;
    fn create_container(&self, config: &ContainerCreateConfig) -> Result<String, BackendError>;
    fn start_container(&self, id: &str) -> Result<(), BackendError>;
    fn stop_container(&self, id: &str, grace: Duration) -> Result<(), BackendError>;
    fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), BackendError>;
    fn inspect_container(&self, id: &str) -> Result<ContainerInspect, BackendError>;
    fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>, BackendError>;
}

/// Parse a `major.minor` API version for comparisons.
pub fn parse_api_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
