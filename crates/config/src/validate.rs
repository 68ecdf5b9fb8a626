//! Configuration validation.
//!
//! Checks TOML syntax, unknown keys (usually typos), types, and a handful of
//! semantic problems that would otherwise only surface at runtime.

use std::{collections::HashMap, path::Path};

use crate::schema::ShimConfig;

/// Network plugins podshim knows how to construct.
pub const KNOWN_NETWORK_PLUGINS: &[&str] = &["noop"];

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "semantic"
    pub category: &'static str,
    /// Dotted path, e.g. "checkpoint.dir"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        (
            "sandbox",
            &[
                "image",
                "seccomp_profile_root",
                "stop_grace_period_secs",
                "legacy_cleanup_done",
            ][..],
        ),
        ("checkpoint", &["dir"][..]),
        ("docker", &["cli", "host"][..]),
        ("network", &["plugin"][..]),
    ])
}

/// Validate a config file on disk.
#[must_use]
pub fn validate_file(path: &Path) -> ValidationResult {
    match std::fs::read_to_string(path) {
        Ok(content) => validate_toml_str(&content),
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read {}: {e}", path.display()),
            );
            result
        },
    }
}

/// Validate a TOML string without touching the filesystem.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            );
            return result;
        },
    };

    check_unknown_fields(&value, &mut result);

    match toml::from_str::<ShimConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut result),
        Err(e) => result.push(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        ),
    }

    result
}

fn check_unknown_fields(value: &toml::Value, result: &mut ValidationResult) {
    let Some(table) = value.as_table() else {
        return;
    };
    let sections = known_sections();
    for (section, body) in table {
        let Some(fields) = sections.get(section.as_str()) else {
            result.push(
                Severity::Warning,
                "unknown-field",
                section.clone(),
                format!("unknown section `{section}`"),
            );
            continue;
        };
        let Some(body) = body.as_table() else {
            continue;
        };
        for key in body.keys() {
            if !fields.contains(&key.as_str()) {
                result.push(
                    Severity::Warning,
                    "unknown-field",
                    format!("{section}.{key}"),
                    format!("unknown field `{key}`"),
                );
            }
        }
    }
}

fn check_semantics(config: &ShimConfig, result: &mut ValidationResult) {
    if config.sandbox.stop_grace_period_secs == 0 {
        result.push(
            Severity::Warning,
            "semantic",
            "sandbox.stop_grace_period_secs",
            "a zero grace period kills sandboxes without waiting",
        );
    }
    if config.checkpoint.dir.is_relative() {
        result.push(
            Severity::Error,
            "semantic",
            "checkpoint.dir",
            "checkpoint directory must be an absolute path",
        );
    }
    if config.docker.cli.trim().is_empty() {
        result.push(
            Severity::Error,
            "semantic",
            "docker.cli",
            "container CLI binary must not be empty",
        );
    }
    if !KNOWN_NETWORK_PLUGINS.contains(&config.network.plugin.as_str()) {
        result.push(
            Severity::Warning,
            "semantic",
            "network.plugin",
            format!(
                "unknown network plugin `{}`, falling back to noop",
                config.network.plugin
            ),
        );
    }
}
