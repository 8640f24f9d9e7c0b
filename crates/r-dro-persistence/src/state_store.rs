//! ---
//! dro_section: "03-persistence-logging"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Durable state, audit log, and drill history bindings."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Hash-sealed envelope around the orchestrator's single durable state value.
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{PersistenceError, Result};

/// Current state envelope version.
pub const STATE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    state: serde_json::Value,
}

/// Persist a state value to the provided filesystem path.
///
/// The serializer is selected based on file extension: `.cbor` writes CBOR,
/// all other extensions default to JSON.
pub fn save_state<T: Serialize>(state: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let state_value = serde_json::to_value(state)?;
    let envelope = StateEnvelope {
        version: STATE_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(&state_value)?,
        state: state_value,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("cbor") => {
            let bytes = serde_cbor::to_vec(&envelope).map_err(PersistenceError::from)?;
            writer.write_all(&bytes)?;
        }
        _ => {
            let json = serde_json::to_vec_pretty(&envelope)?;
            writer.write_all(&json)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Load a state value from disk, verifying the envelope hash.
pub fn load_state<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let envelope = load_envelope(path)?;
    let expected = compute_hash(&envelope.state)?;
    if envelope.hash != expected {
        return Err(PersistenceError::HashMismatch);
    }
    Ok(serde_json::from_value(envelope.state)?)
}

/// Verify the integrity of a stored state value without deserializing it.
pub fn verify_state(path: &Path) -> bool {
    match load_envelope(path) {
        Ok(envelope) => compute_hash(&envelope.state)
            .map(|hash| hash == envelope.hash)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn load_envelope(path: &Path) -> Result<StateEnvelope> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let envelope = match path.extension().and_then(|ext| ext.to_str()) {
        Some("cbor") => serde_cbor::from_slice(&bytes).map_err(PersistenceError::from)?,
        _ => serde_json::from_slice(&bytes)?,
    };
    Ok(envelope)
}

fn compute_hash(state: &serde_json::Value) -> Result<String> {
    let serialized = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

/// Fixed-path store for the orchestrator's single durable state value.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Bind the store to its path on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persist the value, replacing any previous one.
    pub fn save<T: Serialize>(&self, state: &T) -> Result<()> {
        save_state(state, &self.path)
    }

    /// Load the stored value, `None` when nothing was ever persisted.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        load_state(&self.path).map(Some)
    }

    /// Path backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
