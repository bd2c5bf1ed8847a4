//! Record shape, status enumeration and on-wire representation.
//!
//! A record is the unit of the catalog. Its stored form is a UTF-8 JSON
//! object:
//!
//! ```text
//! { "data": "...", "timestamp": 1700000000, "owner": "0x..",
//!   "category": "Puzzle", "status": "pending",
//!   "location": { "lat": 35.68, "lng": 139.69 } }
//! ```
//!
//! Records written before status tracking existed may lack `status`; they
//! read as `Pending` and are never rewritten implicitly.

use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::codec::EncryptedPayload;
use crate::error::{CluevaultError, Result};

/// A unique identifier for a record.
pub type RecordId = String;

/// Number of random base36 characters appended to a record id.
const ID_SUFFIX_LEN: usize = 7;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a record id of the form `<unix-millis>-<7 base36 chars>`.
///
/// The timestamp prefix keeps ids roughly time ordered; the random suffix
/// avoids collisions between independent creators without coordination.
pub fn generate_record_id(unix_millis: i64) -> Result<RecordId> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; ID_SUFFIX_LEN];
    rng.fill(&mut buf).map_err(|_| CluevaultError::Randomness)?;

    let suffix: String = buf
        .iter()
        .map(|b| BASE36[(*b as usize) % BASE36.len()] as char)
        .collect();
    Ok(format!("{}-{}", unix_millis, suffix))
}

/// Whether `s` has the shape [`generate_record_id`] produces.
pub fn is_generated_id(s: &str) -> bool {
    let Some((millis, suffix)) = s.rsplit_once('-') else {
        return false;
    };
    let millis = millis.strip_prefix('-').unwrap_or(millis);
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == ID_SUFFIX_LEN
        && suffix.bytes().all(|b| BASE36.contains(&b))
}

/// Verification state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Initial state, set at creation.
    Pending,
    /// Terminal: accepted by the owner.
    Verified,
    /// Terminal: refused by the owner.
    Rejected,
}

impl RecordStatus {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: RecordStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Verified) | (Self::Pending, Self::Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate pair marking where decryption is meant to happen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `(0,0)` is reserved to mean "no location captured".
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    /// Reject the unset marker, non-finite values and out-of-range coordinates.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_unset() {
            return Err(CluevaultError::Validation(
                "location (0,0) is reserved for unset".into(),
            ));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CluevaultError::Validation(format!(
                "latitude out of range: {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CluevaultError::Validation(format!(
                "longitude out of range: {}",
                self.lng
            )));
        }
        Ok(())
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub payload: EncryptedPayload,
    /// Seconds since the Unix epoch. Set once at creation.
    pub created_at: i64,
    pub owner: String,
    pub category: String,
    pub status: RecordStatus,
    pub location: Location,
}

impl Record {
    /// Case-insensitive identity comparison against the record owner.
    pub fn is_owned_by(&self, actor: &str) -> bool {
        self.owner.eq_ignore_ascii_case(actor)
    }

    /// Rebuild a record from its stored bytes.
    pub(crate) fn from_wire(id: &str, bytes: &[u8]) -> Result<Self> {
        let entry: RecordEntry =
            serde_json::from_slice(bytes).map_err(|e| CluevaultError::CorruptRecord {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            payload: EncryptedPayload::from(entry.data),
            created_at: entry.timestamp,
            owner: entry.owner,
            category: entry.category,
            status: entry.status.unwrap_or_default(),
            location: entry.location.unwrap_or_default(),
        })
    }

    /// Serialize the record into its stored bytes.
    pub(crate) fn to_wire(&self) -> Result<Vec<u8>> {
        let entry = RecordEntry {
            data: self.payload.as_str().to_string(),
            timestamp: self.created_at,
            owner: self.owner.clone(),
            category: self.category.clone(),
            status: Some(self.status),
            location: Some(self.location),
        };
        serde_json::to_vec(&entry).map_err(|e| CluevaultError::Write {
            key: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// The stored JSON object. Field names are fixed by the wire format.
#[derive(Debug, Serialize, Deserialize)]
struct RecordEntry {
    data: String,
    timestamp: i64,
    owner: String,
    category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<RecordStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<Location>,
}

/// Replace only the `status` field of a stored record, leaving every other
/// field and any unknown fields exactly as stored.
pub(crate) fn rewrite_status(id: &str, bytes: &[u8], status: RecordStatus) -> Result<Vec<u8>> {
    let corrupt = |reason: String| CluevaultError::CorruptRecord {
        id: id.to_string(),
        reason,
    };

    let mut value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| corrupt("stored value is not an object".into()))?;
    object.insert(
        "status".to_string(),
        serde_json::Value::String(status.as_str().to_string()),
    );
    serde_json::to_vec(&value).map_err(|e| corrupt(e.to_string()))
}
