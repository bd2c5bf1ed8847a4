//! Error types for cluevault.
//!
//! Every variant is a distinct failure mode of the catalog. Messages are
//! intentionally minimal: they name *what* failed and which record or key
//! was involved, never the payload plaintext.

use thiserror::Error;

use crate::record::RecordStatus;

/// The single error type for all cluevault operations.
#[derive(Debug, Error)]
pub enum CluevaultError {
    /// Input to `create` was rejected (empty category, unset location, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// No value is stored under the given record id or key. Absence, not a fault.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored bytes for a record could not be parsed into the record shape.
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// The id is already present in the index.
    #[error("duplicate record id: {0}")]
    DuplicateId(String),

    /// The oracle refused or failed a write.
    #[error("write failed for key {key}: {reason}")]
    Write { key: String, reason: String },

    /// The oracle reports itself unavailable, or a read did not complete.
    #[error("key/value service unavailable: {0}")]
    Unavailable(String),

    /// The actor is not the owner of the record.
    #[error("actor {actor} may not modify record {id}")]
    Unauthorized { id: String, actor: String },

    /// The requested status transition is not legal from the current state.
    #[error("illegal transition for record {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: RecordStatus,
        to: RecordStatus,
    },

    /// No usable signature was obtained over the decryption challenge.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The value cannot be encoded (non-finite input or cipher failure).
    #[error("encode failed: {0}")]
    Encode(String),

    /// The payload is not a well-formed codec output.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The challenge validity window has closed.
    #[error("challenge expired at {expired_at}")]
    ExpiredChallenge { expired_at: i64 },

    /// The challenge validity window has not opened yet.
    #[error("challenge not valid before {starts_at}")]
    ChallengeNotYetValid { starts_at: i64 },

    /// Configuration could not be read, parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    Randomness,

    /// The oracle does not offer the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CluevaultError>;
