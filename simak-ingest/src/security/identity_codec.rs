//! Identity codec
//!
//! Two transforms over a student identifier (NIM):
//!
//! - **Blind index**: HMAC-SHA256 keyed with the process secret, lowercase hex.
//!   Deterministic, so it serves as the lookup key for students.
//! - **Sealed identity**: AES-256-GCM with a fresh 96-bit random nonce and a
//!   128-bit tag. Non-deterministic; recoverable only with the same key.
//!
//! Decryption fails closed: malformed input or a tag mismatch is an error,
//! never a partially decoded value.

use crate::error::CodecError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{
    Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM,
    NONCE_LEN,
};
use ring::error::Unspecified;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use simak_common::EncryptionKey;
use std::fmt;

const TAG_LEN: usize = 16;

/// Encrypted identifier: nonce, authentication tag and ciphertext
///
/// Storage form is `base64(nonce):base64(tag):base64(ciphertext)`.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedIdentity {
    nonce: [u8; NONCE_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: Vec<u8>,
}

impl SealedIdentity {
    pub fn to_storage_string(&self) -> String {
        format!(
            "{}:{}:{}",
            STANDARD.encode(self.nonce),
            STANDARD.encode(self.tag),
            STANDARD.encode(&self.ciphertext)
        )
    }

    pub fn parse(stored: &str) -> Result<Self, CodecError> {
        let parts: Vec<&str> = stored.split(':').collect();
        let [nonce, tag, ciphertext] = parts.as_slice() else {
            return Err(CodecError::MalformedCiphertext(format!(
                "expected 3 parts, found {}",
                parts.len()
            )));
        };

        let nonce: [u8; NONCE_LEN] = decode_part(nonce, "nonce")?
            .try_into()
            .map_err(|_| CodecError::MalformedCiphertext("nonce must be 12 bytes".to_string()))?;
        let tag: [u8; TAG_LEN] = decode_part(tag, "tag")?
            .try_into()
            .map_err(|_| CodecError::MalformedCiphertext("tag must be 16 bytes".to_string()))?;
        let ciphertext = decode_part(ciphertext, "ciphertext")?;

        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }
}

// Ciphertext bytes are not secret but there is no reason to dump them
impl fmt::Debug for SealedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedIdentity")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

fn decode_part(part: &str, what: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(part)
        .map_err(|e| CodecError::MalformedCiphertext(format!("{} is not base64: {}", what, e)))
}

/// Keyed identity codec. One instance per process, shared behind an `Arc`.
pub struct IdentityCodec {
    key: [u8; 32],
    hmac_key: hmac::Key,
    rng: SystemRandom,
}

impl IdentityCodec {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            key: *key.as_bytes(),
            hmac_key: hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes()),
            rng: SystemRandom::new(),
        }
    }

    /// HMAC-SHA256 of the identifier, 64 lowercase hex characters
    pub fn blind_index(&self, plain: &str) -> String {
        let tag = hmac::sign(&self.hmac_key, plain.as_bytes());
        hex::encode(tag.as_ref())
    }

    pub fn encrypt(&self, plain: &str) -> Result<SealedIdentity, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| CodecError::RandomSource)?;

        let unbound =
            UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| CodecError::EncryptionFailed)?;
        let mut sealing_key = SealingKey::new(unbound, FixedNonceSequence::new(nonce));

        let mut in_out = plain.as_bytes().to_vec();
        let tag = sealing_key
            .seal_in_place_separate_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::EncryptionFailed)?;

        let tag: [u8; TAG_LEN] = tag
            .as_ref()
            .try_into()
            .map_err(|_| CodecError::EncryptionFailed)?;

        Ok(SealedIdentity {
            nonce,
            tag,
            ciphertext: in_out,
        })
    }

    pub fn decrypt(&self, sealed: &SealedIdentity) -> Result<String, CodecError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| CodecError::AuthenticationFailed)?;
        let mut opening_key = OpeningKey::new(unbound, FixedNonceSequence::new(sealed.nonce));

        let mut in_out = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(&sealed.ciphertext);
        in_out.extend_from_slice(&sealed.tag);

        let plain = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::AuthenticationFailed)?;

        String::from_utf8(plain.to_vec()).map_err(|_| {
            CodecError::MalformedCiphertext("plaintext is not valid UTF-8".to_string())
        })
    }

    /// Parse the storage form and decrypt it
    pub fn open_stored(&self, stored: &str) -> Result<String, CodecError> {
        self.decrypt(&SealedIdentity::parse(stored)?)
    }
}

impl fmt::Debug for IdentityCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityCodec([REDACTED])")
    }
}

/// One-shot nonce for ring's `BoundKey` API; a second `advance` fails
struct FixedNonceSequence {
    nonce: Option<[u8; NONCE_LEN]>,
}

impl FixedNonceSequence {
    fn new(nonce: [u8; NONCE_LEN]) -> Self {
        Self { nonce: Some(nonce) }
    }
}

impl NonceSequence for FixedNonceSequence {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        let nonce = self.nonce.take().ok_or(Unspecified)?;
        Ok(Nonce::assume_unique_for_key(nonce))
    }
}
