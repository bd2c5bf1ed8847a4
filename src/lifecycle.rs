//! Record status state machine.
//!
//! ```text
//! Pending ──verify──▶ Verified
//!    └─────reject──▶ Rejected
//! ```
//!
//! Only the record owner may move a record, and only out of `Pending`.
//! Repeating a transition is an error the actor sees, not a silent no-op.

use std::sync::{Arc, Mutex};

use crate::audit::{AuditLog, AuditRecord, AuditSink};
use crate::clock::Clock;
use crate::error::{CluevaultError, Result};
use crate::record::{Record, RecordId, RecordStatus};
use crate::store::RecordStore;

/// A status change that has been authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: RecordId,
    pub from: RecordStatus,
    pub to: RecordStatus,
}

/// Decide whether `actor` may move `record` to `to`.
///
/// Ownership is checked before state, so a non-owner learns nothing about
/// where the record sits in its lifecycle.
pub fn authorize(record: &Record, actor: &str, to: RecordStatus) -> Result<Transition> {
    if !record.is_owned_by(actor) {
        return Err(CluevaultError::Unauthorized {
            id: record.id.clone(),
            actor: actor.to_string(),
        });
    }
    if !record.status.can_transition_to(to) {
        return Err(CluevaultError::IllegalTransition {
            id: record.id.clone(),
            from: record.status,
            to,
        });
    }
    Ok(Transition {
        id: record.id.clone(),
        from: record.status,
        to,
    })
}

/// Drives owner-initiated verification and rejection, recording each
/// successful transition in the audit log.
#[derive(Clone)]
pub struct LifecycleController {
    store: RecordStore,
    audit: Arc<Mutex<AuditLog>>,
    clock: Arc<dyn Clock>,
}

impl LifecycleController {
    /// A controller with an empty audit log. `clock` stamps audit records.
    pub fn new(store: RecordStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit: Arc::new(Mutex::new(AuditLog::new())),
            clock,
        }
    }

    /// `Pending -> Verified` on behalf of the record owner.
    pub async fn verify(&self, id: &str, actor: &str) -> Result<Transition> {
        self.transition(id, actor, RecordStatus::Verified).await
    }

    /// `Pending -> Rejected` on behalf of the record owner.
    pub async fn reject(&self, id: &str, actor: &str) -> Result<Transition> {
        self.transition(id, actor, RecordStatus::Rejected).await
    }

    async fn transition(&self, id: &str, actor: &str, to: RecordStatus) -> Result<Transition> {
        let transition = match self.store.update_status(id, to, actor).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(record_id = id, actor, requested = %to, error = %e, "transition refused");
                return Err(e);
            }
        };

        tracing::info!(
            record_id = id,
            actor,
            from = %transition.from,
            to = %transition.to,
            "record status changed"
        );

        self.record_audit(AuditRecord::from_transition(&transition, actor, self.clock.now()))
            .await;
        Ok(transition)
    }

    /// Sinks may block on file I/O, so the append runs on the blocking pool.
    /// It completes before the transition is reported.
    async fn record_audit(&self, entry: AuditRecord) {
        let audit = Arc::clone(&self.audit);
        let record_id = entry.record_id.clone();
        let appended = tokio::task::spawn_blocking(move || {
            let mut log = audit.lock().unwrap_or_else(|p| p.into_inner());
            log.push(entry);
        })
        .await;
        if let Err(e) = appended {
            tracing::error!(record_id = %record_id, error = %e, "audit append did not complete");
        }
    }

    /// Forward every future audit record to `sink` as well.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.with_audit(|log| log.add_sink(sink));
    }

    /// A copy of the in-memory audit log.
    pub fn audit_log(&self) -> AuditLog {
        self.with_audit(|log| log.snapshot())
    }

    fn with_audit<T>(&self, f: impl FnOnce(&mut AuditLog) -> T) -> T {
        // A panic while holding the lock cannot leave a half-appended record.
        let mut guard = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("store", &self.store)
            .finish()
    }
}
