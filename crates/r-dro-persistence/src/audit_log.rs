//! ---
//! dro_section: "03-persistence-logging"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Durable state, audit log, and drill history bindings."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Append-only audit log.
//!
//! Every state transition, guard evaluation, and collaborator call outcome is
//! recorded here; the log, not the final `FailoverState`, is the source of
//! truth for post-incident "what happened" questions.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{state_store::STATE_VERSION, PersistenceError, Result};
use sha2::Digest;

/// Audit log file header stored as the first line in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl AuditLogHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: STATE_VERSION,
            created_at,
            hash,
        }
    }
}

/// What happened, recorded for post-incident audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A state-machine transition, successful or terminal.
    Transition {
        /// Phase left.
        from: String,
        /// Phase entered.
        to: String,
        /// Failover/failback attempt this transition belongs to.
        attempt: Option<Uuid>,
        /// Error recorded alongside the transition, if any.
        error: Option<String>,
    },
    /// A guard evaluation and its verdict.
    GuardEvaluated {
        /// Guard name (e.g. `standby_healthy`, `replication_lag`).
        guard: String,
        /// Whether the guard passed.
        passed: bool,
        /// Human-readable detail for the audit trail.
        detail: String,
    },
    /// Outcome of one collaborator call.
    CollaboratorCall {
        /// Call identifier (e.g. `dns.upsert`, `db.promote`).
        call: String,
        /// Region the call targeted, when applicable.
        region: Option<String>,
        /// `ok` or the error text.
        outcome: String,
    },
    /// A DR drill finished and its result was recorded.
    DrillCompleted {
        /// Identifier of the drill run.
        drill_id: Uuid,
        /// Whether the drill met its targets.
        passed: bool,
    },
}

/// Envelope around one audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The recorded event.
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    /// Construct a record for the provided event.
    pub fn new(event: AuditEvent) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Append-only writer for the audit log.
pub struct AuditLogWriter {
    path: std::path::PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl AuditLogWriter {
    /// Open an audit log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists || is_empty(path)? {
            let header = AuditLogHeader::new();
            let line = serde_json::to_string(&header)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
            });
        }

        let next_sequence = determine_next_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a new event and return the assigned sequence number.
    pub fn append(&mut self, event: AuditEvent) -> Result<u64> {
        self.next_sequence += 1;
        let record = AuditRecord {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(record.sequence)
    }

    /// Access the current path on disk (useful for tests).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_empty(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.len() == 0)
}

fn determine_next_sequence(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut last_seq = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
            last_seq = record.sequence;
        }
    }
    Ok(last_seq)
}

/// Replay the log in order, invoking the callback for each record.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(AuditRecord) -> Result<()>,
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0usize;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(&line)?;
        handler(record)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over the log records.
pub struct AuditLogReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl AuditLogReader {
    /// Open the log for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?; // discard header
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for AuditLogReader {
    type Item = Result<AuditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lines.next()? {
            Ok(line) if line.trim().is_empty() => self.next(),
            Ok(line) => Some(serde_json::from_str(&line).map_err(PersistenceError::from)),
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_replay_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut writer = AuditLogWriter::open(&path).unwrap();

        writer
            .append(AuditEvent::Transition {
                from: "stable".into(),
                to: "detecting".into(),
                attempt: None,
                error: None,
            })
            .unwrap();
        writer
            .append(AuditEvent::GuardEvaluated {
                guard: "replication_lag".into(),
                passed: true,
                detail: "lag=12s".into(),
            })
            .unwrap();

        let mut events = Vec::new();
        replay(&path, |record| {
            events.push(record.event.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::Transition { .. }));
        assert!(matches!(events[1], AuditEvent::GuardEvaluated { .. }));
    }

    #[test]
    fn sequences_continue_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let mut writer = AuditLogWriter::open(&path).unwrap();
            assert_eq!(
                writer
                    .append(AuditEvent::CollaboratorCall {
                        call: "dns.upsert".into(),
                        region: Some("eu-west".into()),
                        outcome: "ok".into(),
                    })
                    .unwrap(),
                1
            );
        }
        let mut writer = AuditLogWriter::open(&path).unwrap();
        assert_eq!(
            writer
                .append(AuditEvent::CollaboratorCall {
                    call: "db.promote".into(),
                    region: Some("eu-west".into()),
                    outcome: "ok".into(),
                })
                .unwrap(),
            2
        );

        let reader = AuditLogReader::open(&path).unwrap();
        let sequences: Vec<_> = reader.map(|record| record.unwrap().sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
