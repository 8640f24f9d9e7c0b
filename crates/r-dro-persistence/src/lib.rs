//! ---
//! dro_section: "03-persistence-logging"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Durable state, audit log, and drill history bindings."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable storage for the orchestrator: the single `FailoverState` envelope,
//! the append-only audit log that records every transition and guard
//! evaluation, and the immutable drill history.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization issues.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// Reported when a state envelope fails integrity verification.
    #[error("state envelope hash mismatch")]
    HashMismatch,
}

pub mod audit_log;
pub mod drill_history;
pub mod state_store;

pub use audit_log::{replay as replay_audit_log, AuditEvent, AuditLogReader, AuditLogWriter, AuditRecord};
pub use drill_history::DrillHistory;
pub use state_store::{load_state, save_state, verify_state, StateStore, STATE_VERSION};
