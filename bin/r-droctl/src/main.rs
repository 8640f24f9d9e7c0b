//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "binary"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Operator CLI for failover, failback, drills, and status."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_dro_common::config::AppConfig;
use r_dro_common::logging;

mod drill;
mod failback;
mod failover;
mod runtime;
mod status;

const CONFIG_CANDIDATES: &[&str] = &["r-dro.toml", "config/r-dro.toml", "/etc/r-dro/config.toml"];

#[derive(Debug, Parser)]
#[command(author, version, about = "R-DRO failover control utility", long_about = None)]
struct Cli {
    /// Path to the configuration file (takes precedence over discovery and R_DRO_CONFIG).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fail traffic over to a standby region.
    Failover(failover::FailoverArgs),
    /// Walk traffic back to the recovered region through the canary plan.
    Failback,
    /// Run a disaster-recovery drill and grade it against the RTO/RPO targets.
    DrDrill(drill::DrillArgs),
    /// Show coordinator state, per-region health, and applied traffic weights.
    Status,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?
            .parse(),
        None => AppConfig::load(CONFIG_CANDIDATES),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_tracing("r-droctl", &config.logging)?;

    match cli.command {
        Commands::Failover(args) => failover::run(config, args).await,
        Commands::Failback => failback::run(config).await,
        Commands::DrDrill(args) => drill::run(config, args).await,
        Commands::Status => status::run(config).await,
    }
}
