//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "binary"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Operator CLI for failover, failback, drills, and status."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use anyhow::Result;
use clap::Args;
use r_dro_common::config::AppConfig;

use crate::runtime::Runtime;

#[derive(Debug, Args)]
pub struct FailoverArgs {
    /// Standby region to fail traffic over to.
    #[arg(long = "to", value_name = "REGION")]
    pub to: String,
}

pub async fn run(config: AppConfig, args: FailoverArgs) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.coordinator.resume().await?;
    runtime.warm_up().await;

    let outcome = runtime.coordinator.failover(&args.to).await;
    match &outcome {
        Ok(state) => println!(
            "failover complete: serving from '{}', standby '{}'",
            state.active_region, state.standby_region
        ),
        Err(err) => eprintln!("failover did not complete: {err}"),
    }
    runtime.shutdown().await?;
    outcome?;
    Ok(())
}
