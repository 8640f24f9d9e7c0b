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
use r_dro_common::time;
use r_dro_monitor::LagSample;

use crate::runtime::Runtime;

/// Read-only report: no reconciliation, no state changes.
pub async fn run(config: AppConfig) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.warm_up().await;

    let state = runtime.coordinator.state();
    println!(
        "phase:   {} (entered {}s ago)",
        state.phase,
        time::seconds_since(state.phase_entered_at)
    );
    println!("active:  {}", state.active_region);
    println!("standby: {}", state.standby_region);
    if let Some(attempt) = state.attempt {
        println!("attempt: {attempt}");
    }
    if let Some(error) = &state.last_error {
        println!("last error: {error}");
    }

    println!("regions:");
    for region in runtime.registry.snapshot() {
        let lag = match runtime.replication.latest(&region.id).map(|status| status.lag) {
            Some(LagSample::Seconds(lag)) => format!("lag {lag}s"),
            Some(LagSample::Unknown) => "lag unknown".to_owned(),
            None => "no lag sample".to_owned(),
        };
        println!(
            "  {:<12} {:?} (role {:?}, {})",
            region.id, region.health, region.role, lag
        );
    }

    match runtime.dns.current().await {
        Ok(Some(weights)) => println!("weights: {weights}"),
        Ok(None) => println!("weights: none applied"),
        Err(err) => println!("weights: unavailable ({err})"),
    }

    runtime.shutdown().await
}
