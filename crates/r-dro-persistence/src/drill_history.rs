//! ---
//! dro_section: "03-persistence-logging"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Durable state, audit log, and drill history bindings."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Append-only history of finalized drill results. Records are immutable
//! once written; the file is never rewritten in place.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// JSONL-backed drill result history.
#[derive(Debug, Clone)]
pub struct DrillHistory {
    path: PathBuf,
}

impl DrillHistory {
    /// Bind the history to its path on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one finalized record.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Read back all records in append order.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    /// Path backing this history.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        passed: bool,
    }

    #[test]
    fn appends_and_reads_in_order() {
        let dir = tempdir().unwrap();
        let history = DrillHistory::new(dir.path().join("drill-history.log"));

        history.append(&Entry { id: 1, passed: true }).unwrap();
        history.append(&Entry { id: 2, passed: false }).unwrap();

        let entries: Vec<Entry> = history.read_all().unwrap();
        assert_eq!(
            entries,
            vec![
                Entry { id: 1, passed: true },
                Entry { id: 2, passed: false }
            ]
        );
    }

    #[test]
    fn empty_history_reads_as_empty() {
        let dir = tempdir().unwrap();
        let history = DrillHistory::new(dir.path().join("missing.log"));
        let entries: Vec<Entry> = history.read_all().unwrap();
        assert!(entries.is_empty());
    }
}
