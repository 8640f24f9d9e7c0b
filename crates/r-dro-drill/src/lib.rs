//! ---
//! dro_section: "06-dr-verification"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "DR drill runner, RTO/RPO grading, and report rendering."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Disaster-recovery drills: drive a real failover, measure recovery time
//! and data loss against the configured objectives, and append the graded
//! result to the immutable drill history.

mod report;
mod result;
mod verifier;

pub use report::render_report;
pub use result::{grade, DrillResult};
pub use verifier::DrillVerifier;

use r_dro_coordinator::CoordinatorError;
use r_dro_persistence::PersistenceError;

/// Result alias used throughout the drill crate.
pub type Result<T> = std::result::Result<T, DrillError>;

/// Error type for drill execution.
///
/// An attempt that ends `Aborted` or `RolledBack` is a *failed drill*, not
/// an error; this type covers only conditions where no graded result could
/// be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum DrillError {
    /// The coordinator refused to start (wrong phase, unknown region, ...).
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    /// The drill history could not be written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
