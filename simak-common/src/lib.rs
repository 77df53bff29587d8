//! # simak common library
//!
//! Shared code for the simak academic-monitoring services:
//! - Error types
//! - Configuration loading (TOML + environment)
//! - Encryption key resolution for the student identity codec
//! - Tracing initialization
//! - SQLite pool and schema initialization

pub mod config;
pub mod db;
pub mod error;
pub mod key;
pub mod logging;

pub use error::{Error, Result};
pub use key::EncryptionKey;
