//! ---
//! dro_section: "01-core-functionality"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Shared primitives and utilities for the orchestrator runtime."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Shared configuration, logging, and time utilities for the R-DRO workspace.

pub mod config;
pub mod logging;
pub mod time;
