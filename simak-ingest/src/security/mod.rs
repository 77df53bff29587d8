//! Identity protection and credential bootstrap

pub mod credentials;
pub mod identity_codec;

pub use credentials::{derive_credential, verify_password, BootstrapCredential};
pub use identity_codec::{IdentityCodec, SealedIdentity};
