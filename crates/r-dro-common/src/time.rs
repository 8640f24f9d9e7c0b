//! ---
//! dro_section: "01-core-functionality"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Shared primitives and utilities for the orchestrator runtime."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};

/// Capture the current wall-clock instant.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds elapsed between two wall-clock timestamps, negative when
/// `later` precedes `earlier`.
pub fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> i64 {
    (later - earlier).num_seconds()
}

/// Whole seconds since the supplied timestamp, clamped to >= 0.
pub fn seconds_since(earlier: DateTime<Utc>) -> u64 {
    seconds_between(Utc::now(), earlier).max(0) as u64
}
