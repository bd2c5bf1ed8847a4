//! Reversible transform between a numeric value and its stored form.
//!
//! Every component other than the codec treats an [`EncryptedPayload`] as an
//! opaque string. Two codecs share the [`PayloadCodec`] interface:
//!
//! - [`PlaceholderCodec`]: the reversible `FHE-<base64>` encoding used by
//!   existing catalogs. It hides nothing and exists for compatibility.
//! - [`SealedCodec`]: AES-256-GCM under a key derived from a [`MasterKey`].

mod sealed;

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CluevaultError, Result};

pub use sealed::{MasterKey, SealedCodec};

/// Prefix marking a placeholder-encoded payload.
const PLACEHOLDER_PREFIX: &str = "FHE-";

/// Codec output. Opaque to every component except the codec that made it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPayload(String);

impl EncryptedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for EncryptedPayload {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypt-before-store, decrypt-after-authorization.
///
/// Implementations must round-trip exactly: `decode(encode(v)) == v` for
/// every finite `v`.
pub trait PayloadCodec: Send + Sync {
    /// Fails with `Encode` for NaN and infinities.
    fn encode(&self, value: f64) -> Result<EncryptedPayload>;

    /// Fails with `Decode` if `payload` is not a well-formed output of `encode`.
    fn decode(&self, payload: &EncryptedPayload) -> Result<f64>;
}

pub(crate) fn ensure_finite(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CluevaultError::Encode(format!("non-finite value: {}", value)))
    }
}

/// Parse the canonical decimal text of a value. Non-finite results are refused
/// since no codec ever produces them.
pub(crate) fn parse_decimal(text: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| CluevaultError::Decode("not a decimal number".into()))?;
    if !value.is_finite() {
        return Err(CluevaultError::Decode("non-finite value".into()));
    }
    Ok(value)
}

/// `FHE-` followed by the standard base64 of the value's shortest decimal form.
///
/// Decoding falls back to reading an unprefixed payload as a plain decimal
/// string, so catalogs that stored raw numbers stay readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderCodec;

impl PayloadCodec for PlaceholderCodec {
    fn encode(&self, value: f64) -> Result<EncryptedPayload> {
        ensure_finite(value)?;
        let text = value.to_string();
        Ok(EncryptedPayload(format!(
            "{}{}",
            PLACEHOLDER_PREFIX,
            STANDARD.encode(text.as_bytes())
        )))
    }

    fn decode(&self, payload: &EncryptedPayload) -> Result<f64> {
        match payload.as_str().strip_prefix(PLACEHOLDER_PREFIX) {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| CluevaultError::Decode(format!("bad base64: {}", e)))?;
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| CluevaultError::Decode("payload is not UTF-8".into()))?;
                parse_decimal(text)
            }
            None => {
                tracing::debug!("decoding unprefixed payload as plain decimal");
                parse_decimal(payload.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_roundtrip() {
        let codec = PlaceholderCodec;
        for v in [0.0, -0.0, 42.5, -17.25, 1e-300, 1e300, f64::MAX, f64::MIN_POSITIVE, 0.1 + 0.2] {
            let payload = codec.encode(v).unwrap();
            assert!(payload.as_str().starts_with("FHE-"));
            assert_eq!(codec.decode(&payload).unwrap(), v);
        }
    }

    #[test]
    fn test_roundtrip_over_random_bit_patterns() {
        use ring::rand::{SecureRandom, SystemRandom};

        let rng = SystemRandom::new();
        let sealed = SealedCodec::new(&MasterKey::from_bytes([5u8; 32]), "sweep").unwrap();
        let mut checked = 0;
        while checked < 2_000 {
            let mut bits = [0u8; 8];
            rng.fill(&mut bits).unwrap();
            let v = f64::from_bits(u64::from_le_bytes(bits));
            if !v.is_finite() {
                continue;
            }
            let placeholder = PlaceholderCodec.decode(&PlaceholderCodec.encode(v).unwrap()).unwrap();
            assert_eq!(placeholder.to_bits(), v.to_bits(), "placeholder lost {:e}", v);
            let opened = sealed.decode(&sealed.encode(v).unwrap()).unwrap();
            assert_eq!(opened.to_bits(), v.to_bits(), "sealed lost {:e}", v);
            checked += 1;
        }
    }

    #[test]
    fn test_placeholder_format_is_compatible() {
        // btoa("42.5") == "NDIuNQ=="
        let payload = PlaceholderCodec.encode(42.5).unwrap();
        assert_eq!(payload.as_str(), "FHE-NDIuNQ==");
    }

    #[test]
    fn test_non_finite_rejected() {
        let codec = PlaceholderCodec;
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(codec.encode(v), Err(CluevaultError::Encode(_))));
        }
    }

    #[test]
    fn test_plain_decimal_fallback() {
        let codec = PlaceholderCodec;
        let legacy = EncryptedPayload::from("12.75".to_string());
        assert_eq!(codec.decode(&legacy).unwrap(), 12.75);
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let codec = PlaceholderCodec;
        for bad in ["FHE-***", "FHE-aGVsbG8=", "hello", "", "NaN", "FHE-aW5m"] {
            let payload = EncryptedPayload::from(bad.to_string());
            assert!(
                matches!(codec.decode(&payload), Err(CluevaultError::Decode(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
