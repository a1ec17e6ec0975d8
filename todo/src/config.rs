//! Configuration for a tickoff session.
//!
//! Values come from an optional JSON file (see [`TodoConfig::load`]) with
//! command-line flags applied on top. Fields missing from the file keep
//! their defaults:
//!
//! ```json
//! { "data_dir": "/home/me/todos", "debounce_ms": 150 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tickoff_storage::{DatabaseLocation, FileKeyValue, KeyValueStorage, StorageOptions};

/// Longest accepted search quiet period
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The data directory path is empty
    #[error("data directory must not be empty")]
    EmptyDataDir,

    /// The database file name is empty or names a directory
    #[error("database file must be a file name, got {0:?}")]
    InvalidDatabaseFile(PathBuf),

    /// The debounce is longer than [`MAX_DEBOUNCE_MS`]
    #[error("debounce of {0} ms exceeds the {MAX_DEBOUNCE_MS} ms limit")]
    DebounceTooLong(u64),

    /// The configuration file could not be read
    #[error("cannot read {0:?}: {1}")]
    Unreadable(PathBuf, String),

    /// The configuration file is not a valid configuration object
    #[error("invalid configuration in {0:?}: {1}")]
    Malformed(PathBuf, String),
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoConfig {
    /// Directory holding the flat blob and the database
    pub data_dir: PathBuf,
    /// Try the indexed store
    pub indexed_enabled: bool,
    /// Database file name inside `data_dir`
    pub database_file: PathBuf,
    /// Try the flat store
    pub flat_enabled: bool,
    /// Search quiet period in milliseconds
    pub debounce_ms: u64,
}

impl Default for TodoConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tickoff-data"),
            indexed_enabled: true,
            database_file: PathBuf::from("todos.db"),
            flat_enabled: true,
            debounce_ms: 300,
        }
    }
}

impl TodoConfig {
    /// Read a configuration file.
    ///
    /// Values are not validated here; call [`TodoConfig::validate`] once
    /// every override is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreadable`] if the file cannot be read and
    /// [`ConfigError::Malformed`] if it is not a JSON configuration object.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e.to_string()))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Malformed(path.to_path_buf(), e.to_string()))?;
        tracing::debug!(path = %path.display(), "Configuration file read");
        Ok(config)
    }

    /// Set the data directory
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Enable or disable the indexed store
    #[must_use]
    pub const fn indexed(mut self, enabled: bool) -> Self {
        self.indexed_enabled = enabled;
        self
    }

    /// Set the database file name
    #[must_use]
    pub fn database_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.database_file = file.into();
        self
    }

    /// Enable or disable the flat store
    #[must_use]
    pub const fn flat(mut self, enabled: bool) -> Self {
        self.flat_enabled = enabled;
        self
    }

    /// Set the search quiet period
    #[must_use]
    pub const fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// The search quiet period as a `Duration`
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Full path of the database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }
        if self.database_file.file_name().is_none()
            || self.database_file.components().count() != 1
        {
            return Err(ConfigError::InvalidDatabaseFile(self.database_file.clone()));
        }
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::DebounceTooLong(self.debounce_ms));
        }
        Ok(())
    }

    /// Storage available to the session.
    ///
    /// A data directory that cannot be created disables both durable
    /// stores; selection then falls through to memory.
    pub async fn storage_options(&self) -> StorageOptions {
        if !self.indexed_enabled && !self.flat_enabled {
            return StorageOptions::default();
        }

        let files = match FileKeyValue::open(&self.data_dir).await {
            Ok(files) => files,
            Err(error) => {
                tracing::warn!(%error, dir = %self.data_dir.display(), "Data directory unusable");
                return StorageOptions::default();
            }
        };

        StorageOptions {
            database: self
                .indexed_enabled
                .then(|| DatabaseLocation::File(self.database_path())),
            flat: self
                .flat_enabled
                .then(|| Arc::new(files) as Arc<dyn KeyValueStorage>),
        }
    }
}
