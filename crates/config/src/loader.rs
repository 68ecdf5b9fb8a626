use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ShimConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "podshim.toml",
    "podshim.yaml",
    "podshim.yml",
    "podshim.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ShimConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply `PODSHIM_*`
/// environment overrides.
///
/// Search order:
/// 1. `./podshim.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/podshim/podshim.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `ShimConfig::default()` if no config file is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> ShimConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                ShimConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            ShimConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/podshim/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "podshim").map(|d| d.config_dir().to_path_buf())
}

/// Apply `PODSHIM_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut ShimConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ShimConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(image) = lookup("PODSHIM_SANDBOX_IMAGE").filter(|v| !v.is_empty()) {
        config.sandbox.image = Some(image);
    }
    if let Some(dir) = lookup("PODSHIM_CHECKPOINT_DIR").filter(|v| !v.is_empty()) {
        config.checkpoint.dir = PathBuf::from(dir);
    }
    if let Some(root) = lookup("PODSHIM_SECCOMP_PROFILE_ROOT").filter(|v| !v.is_empty()) {
        config.sandbox.seccomp_profile_root = PathBuf::from(root);
    }
    if let Some(cli) = lookup("PODSHIM_DOCKER_CLI").filter(|v| !v.is_empty()) {
        config.docker.cli = cli;
    }
    if let Some(host) = lookup("DOCKER_HOST").filter(|v| !v.is_empty())
        && config.docker.host.is_none()
    {
        config.docker.host = Some(host);
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ShimConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
