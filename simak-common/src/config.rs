//! Configuration loading for simak services
//!
//! Bootstrap configuration is resolved once at process start, in priority order:
//! 1. Command-line arguments (handled by the binary, `clap` with `env` fallbacks)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: defaults are used and a warning is logged.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "SIMAK_CONFIG";

/// Environment variable carrying the hex-encoded identity encryption key
pub const ENCRYPTION_KEY_ENV: &str = "SIMAK_ENCRYPTION_KEY";

/// Deployment flavor; production refuses the built-in development key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Deployment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Deployment::Development),
            "production" | "prod" => Ok(Deployment::Production),
            other => Err(Error::Config(format!("Unknown deployment '{}'", other))),
        }
    }
}

/// How the initial password of a bootstrapped student login is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPolicy {
    /// Legacy behavior: the identifier doubles as the initial password
    #[default]
    IdentifierAsPassword,
    /// A random secret nobody knows; the account needs an out-of-band reset
    RandomSecret,
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP bind address, e.g. "127.0.0.1:5780"
    #[serde(default)]
    pub bind_address: Option<String>,

    #[serde(default)]
    pub deployment: Deployment,

    /// Hex-encoded 32-byte key. Prefer SIMAK_ENCRYPTION_KEY.
    #[serde(default)]
    pub encryption_key: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Transcript ingestion tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Jobs processed simultaneously by one worker pool
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Student groups persisted simultaneously within one job
    #[serde(default = "default_group_concurrency")]
    pub group_concurrency: usize,

    /// Queue polling interval when idle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deliveries per job before it is marked FAILED
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub credential_policy: CredentialPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            group_concurrency: default_group_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            credential_policy: CredentialPolicy::default(),
        }
    }
}

impl IngestConfig {
    /// Reject values that would stall the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            return Err(Error::Config("ingest.worker_concurrency must be at least 1".to_string()));
        }
        if self.group_concurrency == 0 {
            return Err(Error::Config("ingest.group_concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("ingest.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_group_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

/// Parse TOML configuration text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    config.ingest.validate()?;
    Ok(config)
}

/// Load the TOML config, degrading to defaults when the file does not exist
///
/// `explicit` comes from `--config` / SIMAK_CONFIG. An explicit path that does
/// not exist is still only a warning; a file that exists but does not parse is
/// an error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let Some(path) = path else {
        warn!("Could not determine config directory, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = parse_toml_config(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default TOML location: `<config_dir>/simak/simak-ingest.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("simak").join("simak-ingest.toml"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("simak").join("simak.db"))
        .unwrap_or_else(|| PathBuf::from("./simak_data/simak.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = parse_toml_config("").unwrap();
        assert!(config.database_path.is_none());
        assert_eq!(config.deployment, Deployment::Development);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingest.worker_concurrency, 5);
        assert_eq!(config.ingest.group_concurrency, 4);
        assert_eq!(config.ingest.max_attempts, 3);
        assert_eq!(config.ingest.credential_policy, CredentialPolicy::IdentifierAsPassword);
    }

    #[test]
    fn test_full_toml() {
        let config = parse_toml_config(
            r#"
            database_path = "/var/lib/simak/simak.db"
            bind_address = "0.0.0.0:8080"
            deployment = "production"

            [logging]
            level = "debug"

            [ingest]
            worker_concurrency = 2
            poll_interval_ms = 250
            credential_policy = "random_secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/var/lib/simak/simak.db")));
        assert_eq!(config.bind_address.as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(config.deployment, Deployment::Production);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.ingest.worker_concurrency, 2);
        assert_eq!(config.ingest.group_concurrency, 4);
        assert_eq!(config.ingest.poll_interval_ms, 250);
        assert_eq!(config.ingest.credential_policy, CredentialPolicy::RandomSecret);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse_toml_config("[ingest]\nworker_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_deployment_from_str() {
        assert_eq!("prod".parse::<Deployment>().unwrap(), Deployment::Production);
        assert_eq!(" Development ".parse::<Deployment>().unwrap(), Deployment::Development);
        assert!("staging".parse::<Deployment>().is_err());
    }
}
