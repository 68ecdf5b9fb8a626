use std::path::Path;

use {
    anyhow::{Context, Result, bail},
    clap::Args,
    podshim_sandbox::{Sandbox, SandboxConfig, SandboxFilter, SandboxService, SandboxState},
};

#[derive(Args)]
pub struct ListArgs {
    /// Only the sandbox with this exact id.
    #[arg(long)]
    id: Option<String>,
    /// `ready` or `notready`.
    #[arg(long)]
    state: Option<SandboxState>,
    /// Label selector entry `key=value`; repeat to require several.
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

impl ListArgs {
    /// `None` when nothing was given, so checkpoint-only sandboxes are listed.
    fn filter(&self) -> Option<SandboxFilter> {
        if self.id.is_none() && self.state.is_none() && self.labels.is_empty() {
            return None;
        }
        Some(SandboxFilter {
            id: self.id.clone(),
            state: self.state,
            label_selector: self.labels.iter().cloned().collect(),
        })
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn read_sandbox_config(path: &Path) -> Result<SandboxConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    let config = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        "json" => serde_json::from_str(&raw)?,
        other => bail!("unsupported sandbox config format: .{other}"),
    };
    Ok(config)
}

pub fn run(service: &SandboxService, path: &Path) -> Result<()> {
    let config = read_sandbox_config(path)?;
    match service.run_sandbox(&config) {
        Ok(id) => {
            println!("{id}");
            Ok(())
        },
        Err(e) => {
            if let Some(id) = &e.sandbox_id {
                eprintln!(
                    "sandbox {id} failed at {} and is not running; stop and rm it to clean up",
                    e.stage()
                );
            }
            Err(e.source.into())
        },
    }
}

pub fn stop(service: &SandboxService, id: &str) -> Result<()> {
    service.stop_sandbox(id)?;
    println!("{id}");
    Ok(())
}

pub fn remove(service: &SandboxService, id: &str) -> Result<()> {
    service.remove_sandbox(id)?;
    println!("{id}");
    Ok(())
}

pub fn inspect(service: &SandboxService, id: &str) -> Result<()> {
    let status = service.sandbox_status(id)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub fn list(service: &SandboxService, args: &ListArgs) -> Result<()> {
    let filter = args.filter();
    let sandboxes = service.list_sandboxes(filter.as_ref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sandboxes)?);
        return Ok(());
    }
    print_table(&sandboxes);
    Ok(())
}

fn print_table(sandboxes: &[Sandbox]) {
    if sandboxes.is_empty() {
        println!("No sandboxes found.");
        return;
    }
    println!("{:<16} {:<10} {:<20} {:<32} ATTEMPT", "ID", "STATE", "NAMESPACE", "NAME");
    for s in sandboxes {
        let short_id: String = s.id.chars().take(13).collect();
        println!(
            "{:<16} {:<10} {:<20} {:<32} {}",
            short_id,
            s.state.to_string(),
            s.metadata.namespace,
            s.metadata.name,
            s.metadata.attempt
        );
    }
}

pub fn checkpoints(service: &SandboxService) -> Result<()> {
    let mut ids = service.checkpoints().list_ids()?;
    ids.sort();
    for id in ids {
        println!("{id}");
    }
    Ok(())
}
