//! Config schema types (sandbox, checkpoint, docker, network).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Seconds the backend waits before killing a stopping sandbox.
pub const DEFAULT_STOP_GRACE_PERIOD_SECS: u64 = 10;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    pub sandbox: SandboxSettings,
    pub checkpoint: CheckpointConfig,
    pub docker: DockerConfig,
    pub network: NetworkConfig,
}

/// Sandbox creation and teardown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Sandbox ("pause") image. Unset means the built-in default.
    pub image: Option<String>,
    /// Directory holding `localhost/<name>` seccomp profiles.
    pub seccomp_profile_root: PathBuf,
    pub stop_grace_period_secs: u64,
    /// Set once every sandbox from the previous shim generation is gone.
    /// While `false`, listings include legacy-named sandboxes.
    pub legacy_cleanup_done: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: None,
            seccomp_profile_root: PathBuf::from("/var/lib/kubelet/seccomp"),
            stop_grace_period_secs: DEFAULT_STOP_GRACE_PERIOD_SECS,
            legacy_cleanup_done: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// One file per sandbox id is written here.
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/dockershim/sandbox"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Container CLI binary.
    pub cli: String,
    /// Daemon endpoint passed as `-H` (e.g. `unix:///var/run/docker.sock`).
    pub host: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            cli: "docker".into(),
            host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network plugin name. Only `"noop"` ships with podshim.
    pub plugin: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            plugin: "noop".into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let cfg: ShimConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.sandbox.image, None);
        assert_eq!(cfg.sandbox.stop_grace_period_secs, 10);
        assert!(!cfg.sandbox.legacy_cleanup_done);
        assert_eq!(cfg.docker.cli, "docker");
        assert_eq!(cfg.network.plugin, "noop");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg: ShimConfig = toml::from_str(
            r#"
            [sandbox]
            image = "registry.local/pause:3.9"

            [checkpoint]
            dir = "/tmp/checkpoints"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sandbox.image.as_deref(), Some("registry.local/pause:3.9"));
        assert_eq!(
            cfg.sandbox.seccomp_profile_root,
            PathBuf::from("/var/lib/kubelet/seccomp")
        );
        assert_eq!(cfg.checkpoint.dir, PathBuf::from("/tmp/checkpoints"));
    }
}
