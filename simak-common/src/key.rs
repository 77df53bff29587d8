//! Identity encryption key
//!
//! The key is process-wide, read-only after startup, and must be identical on
//! every worker instance: rows sealed under one key cannot be opened under another.

use crate::config::Deployment;
use crate::{Error, Result};
use tracing::{info, warn};

/// Key used when nothing is configured. Never acceptable in production.
const DEVELOPMENT_KEY_HEX: &str =
    "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// 256-bit symmetric key shared by the blind index and the identity cipher
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a 64-character hex string
    pub fn from_hex(value: &str) -> Result<Self> {
        let value = value.trim();
        let decoded = hex::decode(value)
            .map_err(|e| Error::Config(format!("Encryption key is not valid hex: {}", e)))?;

        let bytes: [u8; 32] = decoded.try_into().map_err(|decoded: Vec<u8>| {
            Error::Config(format!(
                "Encryption key must be 64 hex characters (32 bytes), got {} bytes",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// The built-in development key
    pub fn development() -> Self {
        // Constant is well-formed; covered by tests
        Self::from_hex(DEVELOPMENT_KEY_HEX).unwrap_or(Self([0u8; 32]))
    }

    pub fn is_development_key(&self) -> bool {
        *self == Self::development()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Resolve the identity key: environment first, then TOML, then the development key
///
/// Production deployments must configure a key, and it must not be the
/// development key.
pub fn resolve_encryption_key(
    env_value: Option<&str>,
    toml_value: Option<&str>,
    deployment: Deployment,
) -> Result<EncryptionKey> {
    let configured = match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!("Encryption key found in both environment and TOML. Using environment.");
            Some((env, "environment"))
        }
        (Some(env), None) => Some((env, "environment")),
        (None, Some(toml)) => Some((toml, "TOML")),
        (None, None) => None,
    };

    let key = match configured {
        Some((value, source)) => {
            let key = EncryptionKey::from_hex(value)?;
            info!("Encryption key loaded from {}", source);
            key
        }
        None => {
            if deployment == Deployment::Production {
                return Err(Error::Config(
                    "No encryption key configured. Set SIMAK_ENCRYPTION_KEY to 64 hex characters."
                        .to_string(),
                ));
            }
            warn!("No encryption key configured, using built-in development key");
            return Ok(EncryptionKey::development());
        }
    };

    if key.is_development_key() {
        if deployment == Deployment::Production {
            return Err(Error::Config(
                "The built-in development encryption key is not allowed in production".to_string(),
            ));
        }
        warn!("Configured encryption key equals the built-in development key");
    }

    Ok(key)
}
