//! Credential bootstrap for newly discovered students
//!
//! Login is the plaintext NIM. The password hash is PBKDF2-HMAC-SHA256 in the
//! self-describing form `pbkdf2-sha256$<iterations>$<salt_b64>$<hash_b64>`.
//! Every bootstrapped credential must be reset on first login.
//!
//! PBKDF2 is deliberately slow; call from `spawn_blocking`.

use crate::error::GroupError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use simak_common::config::CredentialPolicy;
use std::num::NonZeroU32;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const RANDOM_SECRET_LEN: usize = 32;
const SCHEME: &str = "pbkdf2-sha256";

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Credential material for a new student account
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapCredential {
    pub login: String,
    pub password_hash: String,
    pub must_reset_password: bool,
}

impl std::fmt::Debug for BootstrapCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapCredential")
            .field("must_reset_password", &self.must_reset_password)
            .finish_non_exhaustive()
    }
}

pub fn derive_credential(
    plain_nim: &str,
    policy: CredentialPolicy,
) -> Result<BootstrapCredential, GroupError> {
    let rng = SystemRandom::new();

    let password_hash = match policy {
        CredentialPolicy::IdentifierAsPassword => hash_password(&rng, plain_nim.as_bytes())?,
        CredentialPolicy::RandomSecret => {
            // Secret is dropped after hashing; the account needs an out-of-band reset
            let mut secret = [0u8; RANDOM_SECRET_LEN];
            rng.fill(&mut secret)
                .map_err(|_| GroupError::Credential("random source failed".to_string()))?;
            hash_password(&rng, &secret)?
        }
    };

    Ok(BootstrapCredential {
        login: plain_nim.to_string(),
        password_hash,
        must_reset_password: true,
    })
}

fn hash_password(rng: &SystemRandom, secret: &[u8]) -> Result<String, GroupError> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| GroupError::Credential("random source failed".to_string()))?;

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| GroupError::Credential("iteration count must be non-zero".to_string()))?;

    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(ALGORITHM, iterations, &salt, secret, &mut hash);

    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        PBKDF2_ITERATIONS,
        STANDARD.encode(salt),
        STANDARD.encode(hash)
    ))
}

/// Constant-time check of a candidate password against a stored hash.
/// Unrecognized or corrupt hashes never verify.
pub fn verify_password(stored: &str, candidate: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    if scheme != SCHEME {
        return false;
    }
    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };

    pbkdf2::verify(ALGORITHM, iterations, &salt, candidate.as_bytes(), &hash).is_ok()
}
