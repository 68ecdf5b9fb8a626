mod config_commands;
mod sandbox_commands;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    podshim_config::ShimConfig,
    podshim_sandbox::{
        CheckpointManager, DockerCli, FileStore, LegacyCleanupFlag, NoopNetworkPlugin,
        SandboxService, ServiceOptions,
    },
    tracing::{debug, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "podshim", about = "podshim: pod sandbox lifecycle for a docker-backed runtime shim")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of podshim.{toml,yaml,json}).
    #[arg(long, global = true, env = "PODSHIM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start a sandbox from a pod config file (JSON or YAML).
    Run {
        /// Path to the sandbox config.
        config: PathBuf,
    },
    /// Tear down the sandbox network and stop its container.
    Stop { id: String },
    /// Remove the sandbox container and its checkpoint.
    Rm { id: String },
    /// Print the status of one sandbox as JSON.
    Inspect { id: String },
    /// List sandboxes.
    Ls(sandbox_commands::ListArgs),
    /// List checkpoint ids on disk.
    Checkpoints,
    /// Validate the configuration file and report errors/warnings.
    ConfigCheck {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays machine-readable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ShimConfig> {
    let Some(path) = &cli.config else {
        return Ok(podshim_config::discover_and_load());
    };
    let mut config = podshim_config::load_config(path)?;
    podshim_config::apply_env_overrides(&mut config);
    Ok(config)
}

fn build_service(config: &ShimConfig) -> anyhow::Result<SandboxService> {
    let backend = DockerCli::new(config.docker.cli.clone(), config.docker.host.clone());

    if config.network.plugin != "noop" {
        warn!(
            plugin = %config.network.plugin,
            "network plugin is not built into podshim, falling back to no-op"
        );
    }
    let network = NoopNetworkPlugin;

    let store = FileStore::new(config.checkpoint.dir.clone())?;
    debug!(dir = %config.checkpoint.dir.display(), "checkpoint store ready");

    let options = ServiceOptions {
        sandbox_image: config.sandbox.image.clone(),
        registry_auth: None,
        seccomp_profile_root: config.sandbox.seccomp_profile_root.clone(),
        stop_grace_period: Duration::from_secs(config.sandbox.stop_grace_period_secs),
    };

    Ok(SandboxService::new(
        Arc::new(backend),
        Arc::new(network),
        CheckpointManager::new(Arc::new(store)),
        Arc::new(LegacyCleanupFlag::new(config.sandbox.legacy_cleanup_done)),
        options,
    ))
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Commands::ConfigCheck { verbose } = cli.command {
        return config_commands::check(cli.config.as_deref(), verbose);
    }

    let config = load_config(&cli)?;
    let service = build_service(&config)?;

    match cli.command {
        Commands::Run { config } => sandbox_commands::run(&service, &config),
        Commands::Stop { id } => sandbox_commands::stop(&service, &id),
        Commands::Rm { id } => sandbox_commands::remove(&service, &id),
        Commands::Inspect { id } => sandbox_commands::inspect(&service, &id),
        Commands::Ls(args) => sandbox_commands::list(&service, &args),
        Commands::Checkpoints => sandbox_commands::checkpoints(&service),
        Commands::ConfigCheck { .. } => Ok(()),
    }
}
