use std::path::Path;

use anyhow::Result;

use podshim_config::validate::{self, Severity};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(explicit: Option<&Path>, verbose: bool) -> Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(podshim_config::find_config_file);
    let Some(path) = path else {
        eprintln!("No config file found; defaults will be used.");
        return Ok(());
    };

    eprintln!("Checking {}\n", path.display());
    let result = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        validate::validate_file(&path)
    } else {
        // Non-TOML files only get a parse check.
        match podshim_config::load_config(&path) {
            Ok(_) => validate::ValidationResult::default(),
            Err(e) => {
                eprintln!("  {BOLD}{RED}error{RESET} {e:#}");
                std::process::exit(1);
            },
        }
    };

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}
