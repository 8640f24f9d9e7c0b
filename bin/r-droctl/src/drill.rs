//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "binary"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Operator CLI for failover, failback, drills, and status."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use clap::Args;
use r_dro_common::config::AppConfig;
use r_dro_drill::{render_report, DrillVerifier};
use r_dro_persistence::DrillHistory;

use crate::runtime::Runtime;

#[derive(Debug, Args)]
pub struct DrillArgs {
    /// Region to drill against (defaults to the current standby).
    #[arg(long = "to", value_name = "REGION")]
    pub to: Option<String>,

    /// Chain a failback after the failover and report its duration.
    #[arg(long = "with-failback")]
    pub with_failback: bool,
}

pub async fn run(config: AppConfig, args: DrillArgs) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.coordinator.resume().await?;
    runtime.warm_up().await;

    let target = args
        .to
        .unwrap_or_else(|| runtime.coordinator.state().standby_region);
    let verifier = DrillVerifier::new(
        runtime.coordinator.clone(),
        runtime.replication.clone(),
        DrillHistory::new(runtime.config.persistence.drill_history_path()),
        runtime.config.drill.clone(),
    );

    let result = verifier.run(&target, args.with_failback).await;
    runtime.shutdown().await?;

    let result = result?;
    println!("{}", render_report(&result));
    if !result.passed {
        bail!("drill {} failed its objectives", result.drill_id);
    }
    Ok(())
}
