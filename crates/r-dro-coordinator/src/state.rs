//! ---
//! dro_section: "04-failover-coordination"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Failover coordinator state machine and rollback policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Phase;

/// The single durable record of where the orchestrator stands.
///
/// Persisted on every transition and restored at startup. `active_region`
/// and `standby_region` swap only when an attempt completes; mid-sequence
/// they still name the roles the attempt started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverState {
    pub phase: Phase,
    /// Region currently meant to serve traffic.
    pub active_region: String,
    /// Counterpart region: the failover target mid-sequence, the recovering
    /// region after a completed failover.
    pub standby_region: String,
    pub phase_entered_at: DateTime<Utc>,
    /// Most recent error recorded by a guard, abort, or rollback.
    pub last_error: Option<String>,
    /// Identifier of the attempt currently (or last) driving the machine.
    pub attempt: Option<Uuid>,
    /// Whether a completed failover is in effect (set at `FailedOver`,
    /// cleared at `Stable`). Distinguishes what an `Aborted` phase aborted.
    pub failed_over: bool,
}

impl FailoverState {
    /// Fresh state for a deployment that has never failed over.
    pub fn initial(active: impl Into<String>, standby: impl Into<String>) -> Self {
        Self {
            phase: Phase::Stable,
            active_region: active.into(),
            standby_region: standby.into(),
            phase_entered_at: Utc::now(),
            last_error: None,
            attempt: None,
            failed_over: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_stable_without_error() {
        let state = FailoverState::initial("us-east", "eu-west");
        assert_eq!(state.phase, Phase::Stable);
        assert_eq!(state.active_region, "us-east");
        assert_eq!(state.standby_region, "eu-west");
        assert!(state.last_error.is_none());
        assert!(!state.failed_over);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = FailoverState::initial("us-east", "eu-west");
        state.phase = Phase::Canary(25);
        state.attempt = Some(Uuid::new_v4());
        let json = serde_json::to_string(&state).unwrap();
        let back: FailoverState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
