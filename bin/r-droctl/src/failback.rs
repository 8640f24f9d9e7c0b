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
use r_dro_common::config::AppConfig;
use tokio::time::Instant;
use tracing::info;

use crate::runtime::Runtime;

pub async fn run(config: AppConfig) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.coordinator.resume().await?;
    runtime.warm_up().await;

    // The failback guard wants the recovering region continuously healthy
    // for the configured window. Keep observing until the probes have seen
    // enough, bounded at twice the window.
    let recovering = runtime.coordinator.state().standby_region;
    let window = runtime.config.coordinator.failback_health_window;
    let deadline = Instant::now() + window * 2;
    while !runtime.registry.healthy_for(&recovering, window) {
        if Instant::now() >= deadline {
            break; // let the coordinator's guard report the refusal
        }
        info!(region = %recovering, "observing recovering region before failback");
        tokio::time::sleep(runtime.config.probe.interval).await;
    }

    let outcome = runtime.coordinator.failback().await;
    match &outcome {
        Ok(state) => println!(
            "failback complete: serving from '{}', standby '{}'",
            state.active_region, state.standby_region
        ),
        Err(err) => eprintln!("failback did not complete: {err}"),
    }
    runtime.shutdown().await?;
    outcome?;
    Ok(())
}
