//! # cluevault
//!
//! A location-gated clue catalog built on a bare key/value oracle.
//!
//! Creators publish records whose numeric payload is encoded before it is
//! stored. Each record carries a location, a category and an owner, and
//! moves through an owner-controlled `Pending -> Verified | Rejected`
//! lifecycle. Revealing a payload requires signing a challenge bound to a
//! public key, contract address, chain id and validity window.
//!
//! The oracle offers only `get(key)` and `set(key, bytes)`. On top of it the
//! crate keeps a secondary index of live record ids (see [`index`] for its
//! race policy), writes entries before indexing them, and tolerates corrupt
//! entries when listing.
//!
//! ## Public API
//!
//! [`Catalog`] wires every component together and is the intended entry
//! point. The components are public for callers that need to assemble them
//! differently.

pub mod audit;
pub mod challenge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod index;
pub mod lifecycle;
pub mod logging;
pub mod record;
pub mod store;

use std::sync::Arc;

use audit::{AuditLog, AuditSink};
use challenge::{Challenge, DecryptionProtocol, Ed25519Verifier, Signer};
use clock::{Clock, SystemClock};
use codec::{EncryptedPayload, PayloadCodec};
use config::CatalogConfig;
use error::Result;
use gateway::{Gateway, KeyValueOracle};
use index::IndexManager;
use lifecycle::{LifecycleController, Transition};
use record::{Location, Record, RecordId, RecordStatus};
use store::{CatalogStats, NewRecord, RecordStore};

pub use error::CluevaultError;
pub use record::generate_record_id;

/// The assembled catalog: record store, lifecycle controller and decryption
/// protocol over one oracle.
#[derive(Clone)]
pub struct Catalog {
    config: CatalogConfig,
    codec: Arc<dyn PayloadCodec>,
    clock: Arc<dyn Clock>,
    store: RecordStore,
    lifecycle: LifecycleController,
    protocol: DecryptionProtocol,
}

impl Catalog {
    /// Assemble a catalog on the system clock. Fails with `Config` if
    /// `config` does not validate.
    pub fn new(
        oracle: Arc<dyn KeyValueOracle>,
        codec: Arc<dyn PayloadCodec>,
        config: CatalogConfig,
    ) -> Result<Self> {
        Self::with_clock(oracle, codec, config, Arc::new(SystemClock))
    }

    /// Like [`Catalog::new`] with an explicit clock.
    pub fn with_clock(
        oracle: Arc<dyn KeyValueOracle>,
        codec: Arc<dyn PayloadCodec>,
        config: CatalogConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let gateway = Gateway::new(oracle, config.oracle_timeout);
        let index = IndexManager::new(
            gateway.clone(),
            config.index_key.clone(),
            config.append_max_retries,
        );
        let store = RecordStore::new(
            gateway,
            index,
            config.record_key_prefix.clone(),
            Arc::clone(&clock),
        );
        let lifecycle = LifecycleController::new(store.clone(), Arc::clone(&clock));

        let mut protocol = DecryptionProtocol::new(
            Arc::clone(&codec),
            Arc::clone(&clock),
            config.signing_timeout,
            config.enforce_validity_window,
        );
        if config.verify_signatures {
            protocol = protocol.with_verifier(Arc::new(Ed25519Verifier));
        }

        Ok(Self {
            config,
            codec,
            clock,
            store,
            lifecycle,
            protocol,
        })
    }

    /// Encode `value` and publish it as a new `Pending` record owned by `owner`.
    pub async fn create_record(
        &self,
        owner: &str,
        category: &str,
        location: Location,
        value: f64,
    ) -> Result<RecordId> {
        let payload = self.codec.encode(value)?;
        self.store
            .create(NewRecord {
                owner: owner.to_string(),
                category: category.to_string(),
                location,
                payload,
            })
            .await
    }

    /// One record by id. `NotFound` if absent, `CorruptRecord` if unreadable.
    pub async fn get(&self, id: &str) -> Result<Record> {
        self.store.get(id).await
    }

    /// All listed records, newest first.
    pub async fn list(&self) -> Result<Vec<Record>> {
        self.store.list().await
    }

    /// Listed records currently in `status`, newest first.
    pub async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<Record>> {
        self.store.list_by_status(status).await
    }

    /// Counts of listed records per status.
    pub async fn stats(&self) -> Result<CatalogStats> {
        self.store.stats().await
    }

    /// Owner-only `Pending -> Verified`.
    pub async fn verify(&self, id: &str, actor: &str) -> Result<Transition> {
        self.lifecycle.verify(id, actor).await
    }

    /// Owner-only `Pending -> Rejected`.
    pub async fn reject(&self, id: &str, actor: &str) -> Result<Transition> {
        self.lifecycle.reject(id, actor).await
    }

    /// A fresh decryption session for this catalog, valid from now for the
    /// configured number of days, under a random session key.
    ///
    /// A random key cannot pass signature verification. With
    /// `verify_signatures` on, use [`Catalog::new_session_for`].
    pub fn new_session(&self, contract_address: &str, chain_id: u64) -> Result<Challenge> {
        Challenge::new_session(
            contract_address,
            chain_id,
            self.clock.as_ref(),
            self.config.challenge_duration_days,
        )
    }

    /// A session bound to the signer's own `public_key` (hex, optionally
    /// `0x`-prefixed), valid from now for the configured number of days.
    pub fn new_session_for(
        &self,
        public_key: &str,
        contract_address: &str,
        chain_id: u64,
    ) -> Result<Challenge> {
        let challenge = Challenge::new(
            public_key,
            contract_address,
            chain_id,
            self.clock.now().timestamp(),
            self.config.challenge_duration_days,
        );
        challenge.validate_fields()?;
        Ok(challenge)
    }

    /// Reveal a payload after `signer` signs `challenge`.
    pub async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        challenge: &Challenge,
        signer: &dyn Signer,
    ) -> Result<f64> {
        self.protocol.decrypt(payload, challenge, signer).await
    }

    /// Forward every later transition to `sink` as well.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.lifecycle.add_audit_sink(sink);
    }

    /// Transitions recorded so far, without the sinks.
    pub fn audit_log(&self) -> AuditLog {
        self.lifecycle.audit_log()
    }

    /// The validated configuration.
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// The codec payloads are encoded with.
    pub fn codec(&self) -> &dyn PayloadCodec {
        self.codec.as_ref()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn protocol(&self) -> &DecryptionProtocol {
        &self.protocol
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("protocol", &self.protocol)
            .finish()
    }
}
