//! Configuration loading, validation, and env substitution for podshim.
//!
//! Config files: `podshim.toml`, `podshim.yaml`, or `podshim.json`
//! Searched in `./` then `~/.config/podshim/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `PODSHIM_*`
//! overrides for the most commonly tuned settings.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{CheckpointConfig, DockerConfig, NetworkConfig, SandboxSettings, ShimConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
