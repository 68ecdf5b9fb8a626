//! Sandbox configuration, status and filter types.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flat string map used for labels and annotations.
pub type Labels = BTreeMap<String, String>;

/// Identity of a pod sandbox.
///
/// `attempt` disambiguates re-creations of the same pod sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

impl SandboxMetadata {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            namespace: namespace.into(),
            attempt,
        }
    }

    /// Check the identity can be encoded into a backend name and decoded back.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("uid", &self.uid),
        ] {
            if value.contains(crate::naming::NAME_DELIMITER) {
                return Err(Error::InvalidConfig(format!(
                    "sandbox {field} {value:?} must not contain {:?}",
                    crate::naming::NAME_DELIMITER
                )));
            }
        }
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(Error::InvalidConfig(
                "sandbox name and namespace are required".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SandboxMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Sctp => f.write_str("SCTP"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMapping {
    pub protocol: Protocol,
    pub container_port: i32,
    /// `0` means the port is exposed but not bound on the host.
    pub host_port: i32,
    pub host_ip: String,
}

/// Which host namespaces the sandbox shares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceOptions {
    pub host_network: bool,
    pub host_pid: bool,
    pub host_ipc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxSandboxSecurityContext {
    pub namespace_options: NamespaceOptions,
    pub privileged: bool,
    pub readonly_rootfs: bool,
    /// `runtime/default`, `unconfined`, or `localhost/<profile>`.
    pub apparmor_profile: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxSandboxConfig {
    pub cgroup_parent: Option<String>,
    pub security_context: LinuxSandboxSecurityContext,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// Everything needed to create a pod sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub metadata: SandboxMetadata,
    pub hostname: String,
    pub dns_config: Option<DnsConfig>,
    pub port_mappings: Vec<PortMapping>,
    pub labels: Labels,
    pub annotations: Labels,
    pub linux: LinuxSandboxConfig,
}

impl SandboxConfig {
    #[must_use]
    pub fn host_network(&self) -> bool {
        self.linux.security_context.namespace_options.host_network
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    Ready,
    NotReady,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::NotReady => f.write_str("notready"),
        }
    }
}

impl std::str::FromStr for SandboxState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Ok(Self::Ready),
            "notready" | "not-ready" | "not_ready" => Ok(Self::NotReady),
            other => Err(Error::InvalidConfig(format!(
                "unknown sandbox state {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxNetworkStatus {
    /// Empty when unknown or when the sandbox uses the host network.
    pub ip: String,
}

/// Full status of a single sandbox, as returned by
/// [`SandboxService::sandbox_status`](crate::SandboxService::sandbox_status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub id: String,
    pub metadata: SandboxMetadata,
    pub state: SandboxState,
    /// Unix nanoseconds.
    pub created_at: i64,
    pub network: SandboxNetworkStatus,
    pub labels: Labels,
    pub annotations: Labels,
    /// `/proc/<pid>/ns/net`, empty when the sandbox is not running.
    pub network_namespace: String,
    pub host_network: bool,
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub metadata: SandboxMetadata,
    pub state: SandboxState,
    /// Unix nanoseconds, `0` for entries synthesized from a checkpoint.
    pub created_at: i64,
    pub labels: Labels,
    pub annotations: Labels,
}

/// Listing filter. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxFilter {
    pub id: Option<String>,
    pub state: Option<SandboxState>,
    pub label_selector: Labels,
}
