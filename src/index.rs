//! The index of live record ids.
//!
//! The index is a single JSON array of id strings stored under one
//! well-known key. It is the only shared structure written with a
//! read-modify-write cycle, and [`IndexManager::append`] is the only way to
//! write it.
//!
//! ## Race policy
//!
//! If the oracle supports conditional writes, `append` writes against the
//! snapshot it read and, on conflict, re-reads and retries up to
//! `append_max_retries` times.
//!
//! A plain get/set oracle has no way to detect a concurrent writer. Two
//! appends that read the same index both write back their own extension of
//! it, and the later write wins: the earlier id is dropped from the index
//! (its record entry remains, unreferenced and never listed). This lost
//! update window is a known limitation of such oracles.

use std::collections::HashSet;

use crate::error::{CluevaultError, Result};
use crate::gateway::{CasOutcome, Gateway};
use crate::record::RecordId;

/// The index as read at one point in time.
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexSnapshot {
    /// Stored bytes exactly as read, used as the expected value of a
    /// conditional write.
    raw: Option<Vec<u8>>,
    ids: Vec<RecordId>,
}

impl IndexSnapshot {
    fn from_raw(raw: Option<Vec<u8>>) -> Self {
        let ids = raw.as_deref().map(parse_ids).unwrap_or_default();
        Self { raw, ids }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    fn extended_with(&self, id: &str) -> Result<Vec<u8>> {
        let mut ids = self.ids.clone();
        ids.push(id.to_string());
        serde_json::to_vec(&ids).map_err(|e| CluevaultError::Write {
            key: "index".into(),
            reason: e.to_string(),
        })
    }
}

/// Parse stored index bytes.
///
/// A value that is not a JSON array is a cold start. Inside an array, only
/// non-string elements are dropped.
fn parse_ids(bytes: &[u8]) -> Vec<RecordId> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => return Vec::new(),
        Err(_) => {
            tracing::warn!("index value is not UTF-8, treating as empty");
            return Vec::new();
        }
    };

    let elements = match serde_json::from_str::<Vec<serde_json::Value>>(text) {
        Ok(elements) => elements,
        Err(e) => {
            tracing::warn!(error = %e, "index value is not a JSON array, treating as empty");
            return Vec::new();
        }
    };

    let mut seen = HashSet::with_capacity(elements.len());
    let mut ids = Vec::with_capacity(elements.len());
    for (position, element) in elements.into_iter().enumerate() {
        match element {
            serde_json::Value::String(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            other => {
                tracing::warn!(position, element = %other, "index element is not an id, skipping");
            }
        }
    }
    ids
}

/// Owner of the index key.
#[derive(Debug, Clone)]
pub struct IndexManager {
    gateway: Gateway,
    key: String,
    max_retries: u32,
}

impl IndexManager {
    /// Manage the index stored under `key`. `max_retries` bounds conflict
    /// retries on oracles with conditional writes.
    pub fn new(gateway: Gateway, key: impl Into<String>, max_retries: u32) -> Self {
        Self {
            gateway,
            key: key.into(),
            max_retries,
        }
    }

    /// The oracle key holding the index.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// All live record ids, in insertion order, without duplicates.
    pub async fn list_ids(&self) -> Result<Vec<RecordId>> {
        Ok(self.snapshot().await?.ids)
    }

    /// Add `id` to the index. Fails with `DuplicateId` if already present.
    pub async fn append(&self, id: &str) -> Result<()> {
        let snapshot = self.snapshot().await?;
        self.append_from(snapshot, id).await
    }

    pub(crate) async fn snapshot(&self) -> Result<IndexSnapshot> {
        Ok(IndexSnapshot::from_raw(self.gateway.get(&self.key).await?))
    }

    /// Finish an append that started from an earlier read.
    pub(crate) async fn append_from(&self, snapshot: IndexSnapshot, id: &str) -> Result<()> {
        if self.gateway.supports_conditional_writes() {
            self.append_conditional(snapshot, id).await
        } else {
            self.append_unconditional(snapshot, id).await
        }
    }

    async fn append_unconditional(&self, snapshot: IndexSnapshot, id: &str) -> Result<()> {
        if snapshot.contains(id) {
            return Err(CluevaultError::DuplicateId(id.to_string()));
        }
        let bytes = snapshot.extended_with(id)?;
        self.gateway.set(&self.key, bytes).await?;
        tracing::debug!(record_id = id, len = snapshot.ids.len() + 1, "index appended");
        Ok(())
    }

    async fn append_conditional(&self, mut snapshot: IndexSnapshot, id: &str) -> Result<()> {
        for attempt in 0..=self.max_retries {
            if snapshot.contains(id) {
                return Err(CluevaultError::DuplicateId(id.to_string()));
            }
            let bytes = snapshot.extended_with(id)?;

            match self
                .gateway
                .compare_and_set(&self.key, snapshot.raw.as_deref(), bytes)
                .await?
            {
                CasOutcome::Written => {
                    tracing::debug!(record_id = id, attempt, "index appended");
                    return Ok(());
                }
                CasOutcome::Conflict { current } => {
                    tracing::warn!(record_id = id, attempt, "index changed underneath append, retrying");
                    snapshot = IndexSnapshot::from_raw(current);
                }
            }
        }

        Err(CluevaultError::Write {
            key: self.key.clone(),
            reason: format!("index conflict persisted after {} retries", self.max_retries),
        })
    }
}
