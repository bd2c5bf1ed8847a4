//! Adapter around the external key/value oracle.
//!
//! The oracle exposes `get(key) -> bytes` and `set(key, bytes)` and nothing
//! else: no transactions, no multi-key atomicity. An oracle may additionally
//! offer a conditional write, which the index uses to detect lost updates.
//!
//! [`Gateway`] is the only type the rest of the crate talks to. It bounds
//! every call with a timeout, treats empty stored bytes as absence, and
//! handles the JSON boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{CluevaultError, Result};

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected value matched and the new value is now visible.
    Written,
    /// Another writer got there first. Carries the value currently stored.
    Conflict { current: Option<Vec<u8>> },
}

/// The external persistence service.
///
/// Implementations must make each single-key `set` atomic: after it returns
/// `Ok`, subsequent `get`s observe the new value.
#[async_trait]
pub trait KeyValueOracle: Send + Sync {
    /// Stored bytes, or an empty vector when nothing is stored.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Liveness probe.
    async fn is_available(&self) -> Result<bool>;

    fn supports_conditional_writes(&self) -> bool {
        false
    }

    /// Write `value` only if the key currently holds `expected`
    /// (`None` meaning absent or empty).
    async fn compare_and_set(
        &self,
        _key: &str,
        _expected: Option<&[u8]>,
        _value: Vec<u8>,
    ) -> Result<CasOutcome> {
        Err(CluevaultError::Unsupported("compare_and_set"))
    }
}

/// Typed, time-bounded access to a [`KeyValueOracle`].
#[derive(Clone)]
pub struct Gateway {
    oracle: Arc<dyn KeyValueOracle>,
    timeout: Duration,
}

impl Gateway {
    /// Wrap `oracle`, bounding each call by `timeout`.
    pub fn new(oracle: Arc<dyn KeyValueOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// `Ok(None)` when the key holds nothing. Never an error for absence.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = tokio::time::timeout(self.timeout, self.oracle.get(key))
            .await
            .map_err(|_| CluevaultError::Unavailable(format!("read of {} timed out", key)))??;
        tracing::debug!(key, len = bytes.len(), "oracle get");
        Ok(if bytes.is_empty() { None } else { Some(bytes) })
    }

    /// Like [`Gateway::get`] but absence becomes `NotFound`.
    pub async fn get_required(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)
            .await?
            .ok_or_else(|| CluevaultError::NotFound(key.to_string()))
    }

    /// Store `value` under `key`. Any failure, including a timeout or a
    /// transport error reported by the oracle, is a `Write` error.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let len = value.len();
        tokio::time::timeout(self.timeout, self.oracle.set(key, value))
            .await
            .map_err(|_| write_error(key, "timed out"))?
            .map_err(|e| as_write_error(key, e))?;
        tracing::debug!(key, len, "oracle set");
        Ok(())
    }

    /// `false` on an explicit "no", on error, and on timeout.
    pub async fn is_available(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.oracle.is_available()).await {
            Ok(Ok(available)) => available,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "availability probe failed");
                false
            }
            Err(_) => {
                tracing::warn!("availability probe timed out");
                false
            }
        }
    }

    /// Whether [`Gateway::compare_and_set`] is usable.
    pub fn supports_conditional_writes(&self) -> bool {
        self.oracle.supports_conditional_writes()
    }

    /// Conditional write. Failures map as in [`Gateway::set`], except
    /// `Unsupported` which is passed through.
    pub async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        tokio::time::timeout(
            self.timeout,
            self.oracle.compare_and_set(key, expected, value),
        )
        .await
        .map_err(|_| write_error(key, "timed out"))?
        .map_err(|e| match e {
            CluevaultError::Unsupported(_) => e,
            other => as_write_error(key, other),
        })
    }

    /// Read and deserialize JSON. Unparseable bytes are `CorruptRecord`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CluevaultError::CorruptRecord {
                    id: key.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Serialize to JSON and write.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CluevaultError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set(key, bytes).await
    }
}

fn write_error(key: &str, reason: impl Into<String>) -> CluevaultError {
    CluevaultError::Write {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn as_write_error(key: &str, e: CluevaultError) -> CluevaultError {
    match e {
        CluevaultError::Write { .. } => e,
        other => write_error(key, other.to_string()),
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("timeout", &self.timeout)
            .field("conditional_writes", &self.supports_conditional_writes())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// In-process oracle
// ---------------------------------------------------------------------------

/// A [`KeyValueOracle`] held in memory.
///
/// Used for tests and local runs. It can be switched unavailable, made to
/// refuse writes, and built with or without conditional writes.
#[derive(Debug, Default)]
pub struct MemoryOracle {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    conditional_writes: bool,
    unavailable: AtomicBool,
    failing_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryOracle {
    /// A plain get/set oracle with no conditional writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// An oracle that also supports [`KeyValueOracle::compare_and_set`].
    pub fn with_conditional_writes() -> Self {
        Self {
            conditional_writes: true,
            ..Self::default()
        }
    }

    /// Toggle the answer of [`KeyValueOracle::is_available`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// While set, every `set` and `compare_and_set` fails with `Write`.
    pub fn fail_writes(&self, fail: bool) {
        self.failing_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(CluevaultError::Write {
                key: key.to_string(),
                reason: "oracle rejected write".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueOracle for MemoryOracle {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.entries.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable(key)?;
        self.entries.write().await.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }

    fn supports_conditional_writes(&self) -> bool {
        self.conditional_writes
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        if !self.conditional_writes {
            return Err(CluevaultError::Unsupported("compare_and_set"));
        }
        self.check_writable(key)?;

        let mut entries = self.entries.write().await;
        let current = entries.get(key).filter(|v| !v.is_empty());
        if current.map(Vec::as_slice) != expected {
            return Ok(CasOutcome::Conflict {
                current: current.cloned(),
            });
        }
        entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(CasOutcome::Written)
    }
}
