//! ---
//! dro_section: "06-dr-verification"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "DR drill runner, RTO/RPO grading, and report rendering."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use r_dro_common::config::DrillConfig;
use r_dro_coordinator::{Coordinator, CoordinatorError};
use r_dro_monitor::{LagSample, ReplicationMonitor};
use r_dro_persistence::DrillHistory;

use crate::result::{grade, DrillResult};
use crate::Result;

/// Runs a DR drill end to end: real failover, measured objectives, graded
/// and recorded result.
pub struct DrillVerifier {
    coordinator: Arc<Coordinator>,
    replication: Arc<ReplicationMonitor>,
    history: DrillHistory,
    config: DrillConfig,
}

impl DrillVerifier {
    pub fn new(
        coordinator: Arc<Coordinator>,
        replication: Arc<ReplicationMonitor>,
        history: DrillHistory,
        config: DrillConfig,
    ) -> Self {
        Self {
            coordinator,
            replication,
            history,
            config,
        }
    }

    /// Drive a drill against `target` and append the graded result to the
    /// history. Attempts ending `Aborted`/`RolledBack` produce a failed
    /// result; only conditions where nothing could be measured are errors.
    pub async fn run(&self, target: &str, with_failback: bool) -> Result<DrillResult> {
        let drill_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(drill = %drill_id, target, with_failback, "drill starting");

        // RPO is the replication lag at the moment disaster is declared:
        // everything committed after this point on the old primary is
        // assumed lost.
        let rpo_seconds = self
            .replication
            .latest(target)
            .and_then(|status| match status.lag {
                LagSample::Seconds(lag) => Some(lag),
                LagSample::Unknown => None,
            });

        let mut narrative = Vec::new();
        let rto_seconds = match self.coordinator.failover(target).await {
            Ok(_) => {
                let rto = clock.elapsed().as_secs_f64();
                narrative.push(format!("failover to '{target}' completed in {rto:.1}s"));
                Some(rto)
            }
            Err(
                err @ (CoordinatorError::Guard { .. }
                | CoordinatorError::Aborted { .. }
                | CoordinatorError::RolledBack { .. }
                | CoordinatorError::Escalation { .. }),
            ) => {
                warn!(drill = %drill_id, error = %err, "drill failover did not complete");
                narrative.push(format!("failover to '{target}' did not complete: {err}"));
                None
            }
            Err(err) => return Err(err.into()),
        };

        let failback_seconds = if with_failback && rto_seconds.is_some() {
            let failback_clock = Instant::now();
            match self.coordinator.failback().await {
                Ok(_) => {
                    let elapsed = failback_clock.elapsed().as_secs_f64();
                    narrative.push(format!("chained failback completed in {elapsed:.1}s"));
                    Some(elapsed)
                }
                Err(err) => {
                    warn!(drill = %drill_id, error = %err, "chained failback failed");
                    narrative.push(format!("chained failback failed: {err}"));
                    None
                }
            }
        } else {
            None
        };

        let (rto_met, rpo_met, passed) = grade(
            &self.config,
            rto_seconds,
            rpo_seconds,
            with_failback,
            failback_seconds,
        );
        match rpo_seconds {
            Some(rpo) => narrative.push(format!("data-loss bound at drill start: {rpo}s")),
            None => narrative.push("replication lag unknown at drill start".to_owned()),
        }

        let result = DrillResult {
            drill_id,
            target_region: target.to_owned(),
            started_at,
            finished_at: Utc::now(),
            rto_seconds,
            rpo_seconds,
            rto_target_seconds: self.config.rto_target.as_secs(),
            rpo_target_seconds: self.config.rpo_target.as_secs(),
            rto_met,
            rpo_met,
            failback_seconds,
            passed,
            narrative: narrative.join("; "),
        };

        self.history.append(&result)?;
        self.coordinator
            .record_drill(drill_id, passed, rto_seconds.map(Duration::from_secs_f64));
        info!(drill = %drill_id, passed, "drill recorded");
        Ok(result)
    }

    /// All previously recorded drills, oldest first.
    pub fn history(&self) -> Result<Vec<DrillResult>> {
        Ok(self.history.read_all()?)
    }
}
