//! ---
//! dro_section: "02-monitoring"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Region health probing and replication-lag monitoring."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Region health probing and replication monitoring for R-DRO.
//!
//! Each region is observed by its own independent periodic probe task; the
//! latest verdicts land in a shared [`RegionRegistry`] that the coordinator
//! only ever reads.

mod health;
mod region;
mod replication;

pub use health::{HealthEndpoint, HealthProber, HealthResult, HttpHealthEndpoint};
pub use region::{RegionHealth, RegionRegistry, RegionState};
pub use replication::{
    CommitTimestampSource, HttpCommitTimestampSource, LagSample, ReplicationMonitor,
    ReplicationStatus,
};

/// Result alias used throughout the monitor crate.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error type for the monitoring subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The region identifier is not part of the configured topology.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
    /// A collaborator endpoint could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// A collaborator endpoint answered with an unusable body.
    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Transport(err.to_string())
    }
}
