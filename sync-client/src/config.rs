//! Configuration loading for wallet sync.
//!
//! Configuration is loaded from a TOML file (default: `sync.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use walletsync_core::{RetryConfig, RetryConfigError};

use crate::storage::DEFAULT_STATE_KEY;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncSettings {
    /// Retry backoff configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Persistence configuration.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Status channel configuration.
    #[serde(default)]
    pub status: StatusSettings,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Key the snapshot row is stored under.
    #[serde(default = "default_state_key")]
    pub state_key: String,
}

/// Status channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSettings {
    /// Broadcast buffer for status events (default: 256).
    /// Subscribers that fall further behind skip the oldest events.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("walletsync.db")
}

fn default_state_key() -> String {
    DEFAULT_STATE_KEY.to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            state_key: default_state_key(),
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SyncSettings {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would break retry scheduling or status delivery.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.status.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "status.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.storage.state_key.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.state_key must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<RetryConfigError> for ConfigError {
    fn from(e: RetryConfigError) -> Self {
        ConfigError::Invalid(format!("retry: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SyncSettings::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.storage.database, PathBuf::from("walletsync.db"));
        assert_eq!(config.storage.state_key, "nostr-sync-state");
        assert_eq!(config.status.channel_capacity, 256);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: SyncSettings = toml::from_str("").unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.status.channel_capacity, 256);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: SyncSettings = toml::from_str(
            r#"
            [retry]
            max_retries = 8

            [storage]
            database = "/var/lib/wallet/sync.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.storage.database, PathBuf::from("/var/lib/wallet/sync.db"));
        assert_eq!(config.storage.state_key, "nostr-sync-state");
    }

    #[test]
    fn from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\njitter_factor = 0.5").unwrap();
        let config = SyncSettings::from_file(file.path()).unwrap();
        assert_eq!(config.retry.jitter_factor, 0.5);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[retry]\njitter_factor = 1.5").unwrap();
        assert!(matches!(
            SyncSettings::from_file(bad.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn from_file_reports_missing_and_garbage() {
        let missing = SyncSettings::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        writeln!(garbage, "[retry\nmax_retries = ").unwrap();
        assert!(matches!(
            SyncSettings::from_file(garbage.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = SyncSettings::default();
        config.status.channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
