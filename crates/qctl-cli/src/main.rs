//! `qctl`: inspect the devices and queues the queue manager sees.
//!
//! Configuration comes from `--config` (TOML) or the `QCTL_*` environment
//! variables alone. Logs go to stderr; reports go to stdout as text or JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qctl::{ConfigError, PlatformConfig, QueueError, QueueManager};
use tracing::{debug, error};

mod commands;
mod exit;

use commands::{CurrentCommand, DevicesCommand, InfoCommand};
use exit::{EXIT_CONFIG, EXIT_GENERIC_FAIL, EXIT_NOT_FOUND, EXIT_SUCCESS};

/// Inspect compute devices, default queues and the activation stack
#[derive(Parser)]
#[command(name = "qctl")]
#[command(version)]
#[command(long_about = r#"
Inspect compute devices, default queues and the per-thread activation stack.

Examples:
  # List every device
  qctl devices

  # Only OpenCL GPUs, as JSON
  qctl devices --backend opencl --type gpu --json

  # Attributes of the second OpenCL CPU
  qctl info opencl:cpu --index 1

  # Activate a queue and show it
  qctl current opencl:gpu

  # Summary of the whole runtime
  qctl dump

  # Starting point for a qctl.toml
  qctl config --default > qctl.toml
"#)]
struct Cli {
    /// Platform configuration file (TOML)
    #[arg(short, long, value_name = "PATH", global = true, env = "QCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, value_name = "LEVEL", global = true, default_value = "warn")]
    log_level: String,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices grouped by category
    #[command(alias = "ls")]
    Devices(DevicesCommand),

    /// Show the attributes of one device
    Info(InfoCommand),

    /// Show the current queue of this thread
    Current(CurrentCommand),

    /// Summarize platform, categories and queues
    Dump,

    /// Print the effective platform configuration as TOML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let code = match run(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("Command failed: {e}");
            for cause in e.chain().skip(1) {
                error!("  Caused by: {cause}");
            }
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let config = load_configuration(cli.config.as_deref())?;
    debug!(?config, "platform configuration");
    let manager = || QueueManager::from_config(&config).context("Failed to open the platform");

    match cli.command {
        Commands::Devices(cmd) => cmd.run(&manager()?, cli.json),
        Commands::Info(cmd) => cmd.run(&manager()?, cli.json),
        Commands::Current(cmd) => cmd.run(&manager()?, cli.json),
        Commands::Dump => commands::print(&manager()?.report(), cli.json),
        Commands::Config { default } => show_configuration(&config, default),
    }
}

fn load_configuration(path: Option<&std::path::Path>) -> Result<PlatformConfig> {
    match path {
        Some(path) => PlatformConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => PlatformConfig::from_env().context("Invalid QCTL_* environment"),
    }
}

fn show_configuration(config: &PlatformConfig, default: bool) -> Result<()> {
    let text = if default { PlatformConfig::default_toml() } else { config.to_toml() };
    println!("{}", text.context("Failed to serialize configuration")?);
    Ok(())
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn exit_code(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else if e.downcast_ref::<QueueError>().is_some_and(QueueError::is_not_found) {
        EXIT_NOT_FOUND
    } else {
        EXIT_GENERIC_FAIL
    }
}
