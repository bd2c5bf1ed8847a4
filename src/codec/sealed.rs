//! Authenticated payload codec.
//!
//! This is the only module that imports `ring::aead` and `ring::hkdf`.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM
//! - **Key**: HKDF-SHA256(ikm = master key, salt = none, info = `cluevault:payload:{context}`)
//! - **Nonce**: 96-bit, fresh from `SystemRandom` per encode
//! - **AAD**: the context string, so a payload sealed for one catalog does not
//!   open under another even with the same master key
//!
//! ```text
//! SEAL-base64( [ nonce (12 bytes) ][ ciphertext + GCM tag ] )
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{ensure_finite, parse_decimal, EncryptedPayload, PayloadCodec};
use crate::error::{CluevaultError, Result};

const SEALED_PREFIX: &str = "SEAL-";

/// Size of a master key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// The single secret a [`SealedCodec`] is built from.
///
/// - Not `Clone`.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// In production these bytes should come from a KMS.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes).map_err(|_| CluevaultError::Randomness)?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// AES-256-GCM codec bound to one context string.
pub struct SealedCodec {
    key: LessSafeKey,
    context: String,
    rng: SystemRandom,
}

impl SealedCodec {
    pub fn new(master: &MasterKey, context: impl Into<String>) -> Result<Self> {
        let context = context.into();
        let info = format!("cluevault:payload:{}", context);
        let info_slices = [info.as_bytes()];

        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(&master.bytes);
        let okm = prk
            .expand(&info_slices, &AES_256_GCM)
            .map_err(|_| CluevaultError::Encode("key derivation failed".into()))?;
        let key = LessSafeKey::new(UnboundKey::from(okm));

        Ok(Self {
            key,
            context,
            rng: SystemRandom::new(),
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl PayloadCodec for SealedCodec {
    fn encode(&self, value: f64) -> Result<EncryptedPayload> {
        ensure_finite(value)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CluevaultError::Randomness)?;

        let mut in_out = value.to_string().into_bytes();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(self.context.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CluevaultError::Encode("seal failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);

        Ok(EncryptedPayload::from(format!(
            "{}{}",
            SEALED_PREFIX,
            STANDARD.encode(&sealed)
        )))
    }

    fn decode(&self, payload: &EncryptedPayload) -> Result<f64> {
        let encoded = payload
            .as_str()
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| CluevaultError::Decode("not a sealed payload".into()))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CluevaultError::Decode(format!("bad base64: {}", e)))?;
        if bytes.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(CluevaultError::Decode("sealed payload too short".into()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CluevaultError::Decode("bad nonce".into()))?;
        let mut buf = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(self.context.as_bytes()), &mut buf)
            .map_err(|_| CluevaultError::Decode("authentication failed".into()))?;

        let text = std::str::from_utf8(plaintext)
            .map_err(|_| CluevaultError::Decode("payload is not UTF-8".into()))?;
        parse_decimal(text)
    }
}
