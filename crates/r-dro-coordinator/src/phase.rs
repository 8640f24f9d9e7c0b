//! ---
//! dro_section: "04-failover-coordination"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Failover coordinator state machine and rollback policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Phase of the failover state machine.
///
/// `Canary(weight)` carries the percentage of traffic currently routed to
/// the recovering region during failback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stable,
    Detecting,
    Promoting,
    ShiftingDns,
    Scaling,
    Verifying,
    FailedOver,
    Canary(u8),
    Aborted,
    RolledBack,
}

impl Phase {
    /// Phases during which an interrupted failover sequence can be resumed.
    pub fn is_failover_sequence(&self) -> bool {
        matches!(
            self,
            Phase::Detecting | Phase::Promoting | Phase::ShiftingDns | Phase::Scaling | Phase::Verifying
        )
    }

    /// Phases that accept no further driving; the attempt ended here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Stable | Phase::FailedOver | Phase::Aborted | Phase::RolledBack
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stable => write!(f, "stable"),
            Phase::Detecting => write!(f, "detecting"),
            Phase::Promoting => write!(f, "promoting"),
            Phase::ShiftingDns => write!(f, "shifting_dns"),
            Phase::Scaling => write!(f, "scaling"),
            Phase::Verifying => write!(f, "verifying"),
            Phase::FailedOver => write!(f, "failed_over"),
            Phase::Canary(weight) => write!(f, "canary({weight})"),
            Phase::Aborted => write!(f, "aborted"),
            Phase::RolledBack => write!(f, "rolled_back"),
        }
    }
}
