//! Signature-gated decryption.
//!
//! A decrypt attempt is bound to a [`Challenge`]: the actor's public key, the
//! catalog's contract address and chain id, and a validity window. The
//! challenge is rendered into one canonical message, the actor signs it, and
//! only then is the payload decoded.
//!
//! Canonical message, fields in this order, newline separated, no trailing
//! newline:
//!
//! ```text
//! publickey:<public key>
//! contractAddresses:<contract address>
//! contractsChainId:<chain id>
//! startTimestamp:<unix seconds>
//! durationDays:<days>
//! ```
//!
//! Without a [`SignatureVerifier`] installed, obtaining *a* signature is all
//! that is required. That proves only that the caller controls some signer;
//! installing [`Ed25519Verifier`] checks the signature against the challenge
//! public key and the reconstructed message.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

use crate::clock::Clock;
use crate::codec::{EncryptedPayload, PayloadCodec};
use crate::error::{CluevaultError, Result};

const SECONDS_PER_DAY: i64 = 86_400;

/// Random bytes behind a generated session public key (hex doubles it).
const SESSION_KEY_BYTES: usize = 1000;

/// The context a decrypt attempt is bound to. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub public_key: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// Unix seconds at which the window opens.
    pub start_timestamp: i64,
    pub duration_days: u32,
}

impl Challenge {
    pub fn new(
        public_key: impl Into<String>,
        contract_address: impl Into<String>,
        chain_id: u64,
        start_timestamp: i64,
        duration_days: u32,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            contract_address: contract_address.into(),
            chain_id,
            start_timestamp,
            duration_days,
        }
    }

    /// A fresh session starting now, with a random `0x`-prefixed hex public key.
    pub fn new_session(
        contract_address: impl Into<String>,
        chain_id: u64,
        clock: &dyn Clock,
        duration_days: u32,
    ) -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = vec![0u8; SESSION_KEY_BYTES];
        rng.fill(&mut key).map_err(|_| CluevaultError::Randomness)?;
        Ok(Self::new(
            format!("0x{}", hex::encode(key)),
            contract_address,
            chain_id,
            clock.now().timestamp(),
            duration_days,
        ))
    }

    /// Reject string fields that would blur line boundaries in the
    /// canonical message.
    pub fn validate_fields(&self) -> Result<()> {
        for (name, value) in [
            ("public key", &self.public_key),
            ("contract address", &self.contract_address),
        ] {
            if value.contains(['\n', '\r']) {
                return Err(CluevaultError::Validation(format!(
                    "challenge {} contains a line break",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The canonical message. Same five values, same bytes, provided
    /// [`Challenge::validate_fields`] holds.
    pub fn message(&self) -> String {
        format!(
            "publickey:{}\ncontractAddresses:{}\ncontractsChainId:{}\nstartTimestamp:{}\ndurationDays:{}",
            self.public_key,
            self.contract_address,
            self.chain_id,
            self.start_timestamp,
            self.duration_days
        )
    }

    /// First second outside the window: `start + days * 86400`.
    pub fn expires_at(&self) -> i64 {
        self.start_timestamp
            .saturating_add(i64::from(self.duration_days) * SECONDS_PER_DAY)
    }

    /// The window is `[start, expires_at)`.
    pub fn check_window(&self, now: i64) -> Result<()> {
        if now < self.start_timestamp {
            return Err(CluevaultError::ChallengeNotYetValid {
                starts_at: self.start_timestamp,
            });
        }
        if now >= self.expires_at() {
            return Err(CluevaultError::ExpiredChallenge {
                expired_at: self.expires_at(),
            });
        }
        Ok(())
    }
}

/// Free-function form of [`Challenge::message`].
pub fn build_challenge(
    public_key: &str,
    contract_address: &str,
    chain_id: u64,
    start_timestamp: i64,
    duration_days: u32,
) -> String {
    Challenge::new(
        public_key,
        contract_address,
        chain_id,
        start_timestamp,
        duration_days,
    )
    .message()
}

/// Raw signature bytes as returned by a signer.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// Capability to sign a message on behalf of the current actor.
///
/// May wait on a human indefinitely; the protocol bounds it with a timeout.
/// Declining should return `Unauthenticated`.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, message: &str) -> Result<Signature>;
}

/// Checks a signature against the challenge it claims to cover.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, challenge: &Challenge, message: &str, signature: &Signature) -> Result<()>;
}

/// Verifies Ed25519 signatures using the challenge's hex public key
/// (optionally `0x`-prefixed).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, challenge: &Challenge, message: &str, signature: &Signature) -> Result<()> {
        let hex_key = challenge
            .public_key
            .strip_prefix("0x")
            .unwrap_or(&challenge.public_key);
        let public_key = hex::decode(hex_key)
            .map_err(|_| CluevaultError::Unauthenticated("public key is not hex".into()))?;

        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(message.as_bytes(), signature.as_bytes())
            .map_err(|_| {
                CluevaultError::Unauthenticated("signature does not match challenge".into())
            })
    }
}

/// An in-process Ed25519 signer.
pub struct LocalEd25519Signer {
    key_pair: Ed25519KeyPair,
}

impl LocalEd25519Signer {
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CluevaultError::Randomness)?;
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| CluevaultError::Unauthenticated("invalid key pair".into()))?;
        Ok(Self { key_pair })
    }

    /// `0x`-prefixed hex of the public key, suitable for [`Challenge::public_key`].
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.key_pair.public_key().as_ref()))
    }
}

#[async_trait]
impl Signer for LocalEd25519Signer {
    async fn sign(&self, message: &str) -> Result<Signature> {
        Ok(Signature(self.key_pair.sign(message.as_bytes()).as_ref().to_vec()))
    }
}

/// Challenge construction, signature acquisition, window check, decode.
#[derive(Clone)]
pub struct DecryptionProtocol {
    codec: Arc<dyn PayloadCodec>,
    clock: Arc<dyn Clock>,
    signing_timeout: Duration,
    enforce_validity_window: bool,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl DecryptionProtocol {
    pub fn new(
        codec: Arc<dyn PayloadCodec>,
        clock: Arc<dyn Clock>,
        signing_timeout: Duration,
        enforce_validity_window: bool,
    ) -> Self {
        Self {
            codec,
            clock,
            signing_timeout,
            enforce_validity_window,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Reveal the value behind `payload`.
    ///
    /// Fails with `Validation` if a challenge field holds a line break,
    /// `ExpiredChallenge`/`ChallengeNotYetValid` outside the window
    /// (when enforced), and with `Unauthenticated` if the signer declines,
    /// errors, times out, returns nothing, or fails verification.
    pub async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        challenge: &Challenge,
        signer: &dyn Signer,
    ) -> Result<f64> {
        challenge.validate_fields()?;
        if self.enforce_validity_window {
            challenge.check_window(self.clock.now().timestamp())?;
        }

        let message = challenge.message();
        let signature = match tokio::time::timeout(self.signing_timeout, signer.sign(&message)).await
        {
            Ok(Ok(sig)) => sig,
            Ok(Err(CluevaultError::Unauthenticated(reason))) => {
                tracing::warn!(%reason, "challenge signature declined");
                return Err(CluevaultError::Unauthenticated(reason));
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "signer failed");
                return Err(CluevaultError::Unauthenticated(format!("signer failed: {}", e)));
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.signing_timeout, "challenge signature timed out");
                return Err(CluevaultError::Unauthenticated("signing timed out".into()));
            }
        };

        if signature.as_bytes().is_empty() {
            return Err(CluevaultError::Unauthenticated("empty signature".into()));
        }
        if let Some(verifier) = &self.verifier {
            verifier.verify(challenge, &message, &signature)?;
        }

        tracing::debug!(chain_id = challenge.chain_id, "challenge signed, decoding payload");
        self.codec.decode(payload)
    }
}

impl fmt::Debug for DecryptionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionProtocol")
            .field("signing_timeout", &self.signing_timeout)
            .field("enforce_validity_window", &self.enforce_validity_window)
            .field("verifies_signatures", &self.verifier.is_some())
            .finish()
    }
}
