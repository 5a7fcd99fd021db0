//! nodeup - node bootstrap and upgrade orchestrator
//!
//! Installs, runs and upgrades a node made of an execution engine, a bridge
//! and a consensus engine.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// nodeup - node bootstrap and upgrade orchestrator
#[derive(Parser, Debug)]
#[command(name = "nodeup")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "NODEUP_CONFIG")]
    config: Option<PathBuf>,

    /// Installation root (overrides `home` in the configuration file)
    #[arg(long, env = "NODEUP_HOME")]
    home: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) or a filter directive
    #[arg(long, env = "NODEUP_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision or re-provision the installation (idempotent)
    Install(commands::install::InstallArgs),

    /// Run the node in the foreground (binary mode) or start its containers
    Start,

    /// Stop the node
    Stop,

    /// Upgrade binaries or images to a release
    Upgrade(commands::upgrade::UpgradeArgs),

    /// Show installation and process state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let base = commands::load_config(cli.config.as_deref(), cli.home)?;

    match cli.command {
        Commands::Install(args) => commands::install::run(base, &args),
        Commands::Start => commands::start::run(&base),
        Commands::Stop => commands::stop::run(&base),
        Commands::Upgrade(args) => commands::upgrade::run(base, &args),
        Commands::Status { json } => commands::status::run(&base, json),
    }
}
