//! Transition audit trail.
//!
//! Every successful verify or reject leaves one [`AuditRecord`]. The
//! in-memory [`AuditLog`] keeps them in order and hands each one to any
//! registered [`AuditSink`]s. Sink failures are logged and never undo the
//! transition that produced the record.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CluevaultError, Result};
use crate::lifecycle::Transition;
use crate::record::{RecordId, RecordStatus};

/// Receives a copy of every audit record.
pub trait AuditSink: Send {
    fn record(&mut self, entry: &AuditRecord);
}

/// One status change, as it was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: RecordId,
    /// Identity that drove the transition.
    pub actor: String,
    pub from: RecordStatus,
    pub to: RecordStatus,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_transition(transition: &Transition, actor: &str, at: DateTime<Utc>) -> Self {
        Self {
            record_id: transition.id.clone(),
            actor: actor.to_string(),
            from: transition.from,
            to: transition.to,
            at,
        }
    }
}

/// Ordered transitions plus the sinks they fan out to.
#[derive(Default)]
pub struct AuditLog {
    entries: Vec<AuditRecord>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every later record to `sink` too.
    pub fn add_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Hand `entry` to each sink, then keep it.
    pub fn push(&mut self, entry: AuditRecord) {
        for sink in &mut self.sinks {
            sink.record(&entry);
        }
        self.entries.push(entry);
    }

    /// All records, oldest first.
    pub fn entries(&self) -> &[AuditRecord] {
        &self.entries
    }

    /// History of one record, oldest first.
    pub fn for_record<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a AuditRecord> + 'a {
        self.entries.iter().filter(move |e| e.record_id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the entries without the sinks.
    pub fn snapshot(&self) -> AuditLog {
        AuditLog {
            entries: self.entries.clone(),
            sinks: Vec::new(),
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.entries.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Appends audit records to a file, one JSON object per line.
pub struct FileAuditSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating it if needed. Fails with
    /// `Config` if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                CluevaultError::Config(format!("cannot open audit file {}: {}", path.display(), e))
            })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&mut self, entry: &AuditRecord) {
        let written = serde_json::to_writer(&mut self.writer, entry)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            tracing::error!(
                record_id = %entry.record_id,
                path = %self.path.display(),
                error = %e,
                "audit write failed"
            );
        }
    }
}
