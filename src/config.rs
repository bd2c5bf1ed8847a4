//! Catalog configuration.
//!
//! Values come from [`CatalogConfig::default`], a TOML file, or `CLUEVAULT_*`
//! environment variables layered over the defaults. Every constructor runs
//! [`CatalogConfig::validate`] before returning.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CluevaultError, Result};
use crate::record::is_generated_id;

/// Main catalog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Well-known key holding the JSON array of live record ids.
    pub index_key: String,

    /// Prefix prepended to a record id to form its entry key.
    pub record_key_prefix: String,

    /// Retries after a detected index conflict (conditional-write oracles only).
    pub append_max_retries: u32,

    /// Upper bound on a single oracle call.
    #[serde(with = "humantime_serde")]
    pub oracle_timeout: Duration,

    /// Upper bound on waiting for the actor to sign a challenge.
    #[serde(with = "humantime_serde")]
    pub signing_timeout: Duration,

    /// Validity window of a fresh decryption session, in days.
    pub challenge_duration_days: u32,

    /// Refuse to decrypt outside the challenge validity window.
    pub enforce_validity_window: bool,

    /// Check signatures against the reconstructed challenge before decoding.
    pub verify_signatures: bool,

    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json_format: bool,

    /// Include the target module in each line.
    pub with_target: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            index_key: "record_keys".to_string(),
            record_key_prefix: "record_".to_string(),
            append_max_retries: 3,
            oracle_timeout: Duration::from_secs(30),
            signing_timeout: Duration::from_secs(120),
            challenge_duration_days: 30,
            enforce_validity_window: true,
            verify_signatures: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: String) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| CluevaultError::Config(format!("invalid {}: {}", name, e)))
}

fn parse_env_duration(name: &str, raw: String) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(&raw)
        .map_err(|e| CluevaultError::Config(format!("invalid {}: {}", name, e)))
}

impl CatalogConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `CLUEVAULT_<KEY>`, for example
    /// `CLUEVAULT_SIGNING_TIMEOUT=90s` or `CLUEVAULT_LOG_LEVEL=debug`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("CLUEVAULT_INDEX_KEY") {
            config.index_key = v;
        }
        if let Ok(v) = env::var("CLUEVAULT_RECORD_KEY_PREFIX") {
            config.record_key_prefix = v;
        }
        if let Ok(v) = env::var("CLUEVAULT_APPEND_MAX_RETRIES") {
            config.append_max_retries = parse_env("append max retries", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_ORACLE_TIMEOUT") {
            config.oracle_timeout = parse_env_duration("oracle timeout", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_SIGNING_TIMEOUT") {
            config.signing_timeout = parse_env_duration("signing timeout", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_CHALLENGE_DURATION_DAYS") {
            config.challenge_duration_days = parse_env("challenge duration", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_ENFORCE_VALIDITY_WINDOW") {
            config.enforce_validity_window = parse_env("validity window flag", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_VERIFY_SIGNATURES") {
            config.verify_signatures = parse_env("signature verification flag", v)?;
        }
        if let Ok(v) = env::var("CLUEVAULT_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = env::var("CLUEVAULT_LOG_JSON") {
            config.logging.json_format = parse_env("JSON flag", v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CluevaultError::Config(format!("failed to read file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text. Missing fields take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| CluevaultError::Config(format!("failed to parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the catalog cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.index_key.is_empty() {
            return Err(CluevaultError::Config("index_key must not be empty".into()));
        }
        if self.record_key_prefix.is_empty() {
            return Err(CluevaultError::Config(
                "record_key_prefix must not be empty".into(),
            ));
        }
        // A generated record id must never map onto the index key.
        let shadowed = self
            .index_key
            .strip_prefix(&self.record_key_prefix)
            .is_some_and(is_generated_id);
        if shadowed || self.index_key == self.record_key_prefix {
            return Err(CluevaultError::Config(format!(
                "index_key {:?} collides with record_key_prefix {:?}",
                self.index_key, self.record_key_prefix
            )));
        }
        if self.challenge_duration_days == 0 {
            return Err(CluevaultError::Config(
                "challenge_duration_days must be greater than 0".into(),
            ));
        }
        if self.oracle_timeout.is_zero() || self.signing_timeout.is_zero() {
            return Err(CluevaultError::Config("timeouts must be non-zero".into()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(CluevaultError::Config(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
