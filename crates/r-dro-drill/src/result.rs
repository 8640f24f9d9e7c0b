//! ---
//! dro_section: "06-dr-verification"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "DR drill runner, RTO/RPO grading, and report rendering."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use r_dro_common::config::DrillConfig;

/// Immutable record of one finished drill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillResult {
    pub drill_id: Uuid,
    pub target_region: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Measured recovery time in seconds; `None` when the failover never
    /// completed.
    pub rto_seconds: Option<f64>,
    /// Replication lag at drill start, the measured data-loss bound; `None`
    /// when the lag was unknown.
    pub rpo_seconds: Option<u64>,
    pub rto_target_seconds: u64,
    pub rpo_target_seconds: u64,
    pub rto_met: bool,
    pub rpo_met: bool,
    /// Duration of the chained failback, when one was requested and ran to
    /// completion.
    pub failback_seconds: Option<f64>,
    pub passed: bool,
    pub narrative: String,
}

/// Grade measured values against the configured objectives.
///
/// An unknown RPO fails its target: a drill cannot prove a data-loss bound
/// it never measured. A requested failback that did not complete fails the
/// drill as a whole.
pub fn grade(
    config: &DrillConfig,
    rto_seconds: Option<f64>,
    rpo_seconds: Option<u64>,
    failback_requested: bool,
    failback_seconds: Option<f64>,
) -> (bool, bool, bool) {
    let rto_met = rto_seconds
        .map(|rto| rto <= config.rto_target.as_secs_f64())
        .unwrap_or(false);
    let rpo_met = rpo_seconds
        .map(|rpo| rpo <= config.rpo_target.as_secs())
        .unwrap_or(false);
    let failback_ok = !failback_requested || failback_seconds.is_some();
    (rto_met, rpo_met, rto_met && rpo_met && failback_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> DrillConfig {
        DrillConfig {
            rto_target: Duration::from_secs(900),
            rpo_target: Duration::from_secs(300),
        }
    }

    #[test]
    fn passes_when_both_objectives_met() {
        let (rto_met, rpo_met, passed) = grade(&config(), Some(420.0), Some(90), false, None);
        assert!(rto_met);
        assert!(rpo_met);
        assert!(passed);
    }

    #[test]
    fn unknown_rpo_fails_its_target() {
        let (_, rpo_met, passed) = grade(&config(), Some(420.0), None, false, None);
        assert!(!rpo_met);
        assert!(!passed);
    }

    #[test]
    fn missed_rto_fails_the_drill() {
        let (rto_met, _, passed) = grade(&config(), Some(1200.0), Some(90), false, None);
        assert!(!rto_met);
        assert!(!passed);
    }

    #[test]
    fn requested_failback_must_complete() {
        let (_, _, passed) = grade(&config(), Some(420.0), Some(90), true, None);
        assert!(!passed);
        let (_, _, passed) = grade(&config(), Some(420.0), Some(90), true, Some(1800.0));
        assert!(passed);
    }

    #[test]
    fn result_round_trips_through_json() {
        let result = DrillResult {
            drill_id: Uuid::new_v4(),
            target_region: "eu-west".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rto_seconds: Some(42.0),
            rpo_seconds: Some(90),
            rto_target_seconds: 900,
            rpo_target_seconds: 300,
            rto_met: true,
            rpo_met: true,
            failback_seconds: None,
            passed: true,
            narrative: "failover to eu-west completed".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: DrillResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
