//! ---
//! dro_section: "04-failover-coordination"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Failover coordinator state machine and rollback policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! The coordinator sequences failover and canary failback across the
//! collaborator adapters, owns the single durable `FailoverState`, and
//! appends every transition, guard verdict, and collaborator outcome to the
//! audit log.
//!
//! Mutations run single-writer: an attempt claims the state under a mutex
//! before its first external call, so a second concurrent request is
//! rejected with [`CoordinatorError::InProgress`] instead of interleaving.

mod coordinator;
mod phase;
mod state;

pub use coordinator::{Collaborators, Coordinator};
pub use phase::Phase;
pub use state::FailoverState;

use r_dro_adapters::AdapterError;
use r_dro_persistence::PersistenceError;

/// Result alias used throughout the coordinator crate.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Another attempt holds the state machine.
    #[error("an attempt is already in progress (phase {phase})")]
    InProgress {
        /// Phase observed when the request was rejected.
        phase: Phase,
    },
    /// The operation is not valid in the current phase.
    #[error("operation requires phase {required}, current phase is {actual}")]
    BadPhase {
        /// Phase(s) the operation requires.
        required: &'static str,
        /// Phase observed instead.
        actual: Phase,
    },
    /// A precondition guard refused the attempt. No external side effects.
    #[error("guard '{guard}' refused the attempt: {detail}")]
    Guard { guard: &'static str, detail: String },
    /// The attempt was aborted and any applied traffic split reverted.
    #[error("attempt aborted: {detail}")]
    Aborted { detail: String },
    /// The attempt was rolled back to the previous region after a
    /// post-DNS-shift failure.
    #[error("attempt rolled back to '{restored}': {detail}")]
    RolledBack { restored: String, detail: String },
    /// The previous region is unhealthy too; an operator must decide.
    /// The state machine stays parked in `Verifying`.
    #[error("escalation required, no healthy region to roll back to: {detail}")]
    Escalation { detail: String },
    /// The region identifier is not part of the configured topology.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
    /// A collaborator call failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// Durable state or audit log I/O failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
