//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Collaborator API adapters and retry policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Narrow adapters over the collaborator APIs the orchestrator drives:
//! weighted DNS records, database promotion, capacity scaling, and the
//! error-rate signal consumed during canary failback.
//!
//! Every outbound call carries an explicit timeout. Retries with bounded
//! exponential backoff are applied only to calls that are idempotent by
//! contract.

mod dns;
mod error_rate;
mod promotion;
mod retry;
mod scaler;

pub use dns::{DnsProvider, DnsWeightManager, HttpDnsProvider, TrafficWeights};
pub use error_rate::{ErrorRateSignal, HttpErrorRateSignal};
pub use promotion::{DatabaseControl, DbRole, HttpDatabaseControl, PromotionController};
pub use retry::{retry_idempotent, RetryPolicy};
pub use scaler::{CapacityScaler, HttpScalingApi, ScalingApi};

/// Result alias used throughout the adapter crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Error type for collaborator calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// The collaborator endpoint could not be reached (includes timeouts).
    #[error("transport error: {0}")]
    Transport(String),
    /// The collaborator answered with an HTTP error status.
    #[error("collaborator returned status {0}")]
    Status(u16),
    /// The collaborator answered with an unusable body.
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    /// A request failed local validation before any call was issued.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The region identifier is not part of the configured topology.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
    /// Promotion did not converge within its bounded wait.
    #[error("promotion of region '{region}' did not complete within {waited_secs}s")]
    PromotionTimeout { region: String, waited_secs: u64 },
}

impl AdapterError {
    /// Transient errors are safe to retry for idempotent calls.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Transport(_) => true,
            AdapterError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            AdapterError::Status(status.as_u16())
        } else {
            AdapterError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_xx_is_transient_four_xx_is_not() {
        assert!(AdapterError::Status(503).is_transient());
        assert!(!AdapterError::Status(404).is_transient());
        assert!(AdapterError::Transport("timed out".into()).is_transient());
        assert!(!AdapterError::Validation("weights".into()).is_transient());
    }
}
