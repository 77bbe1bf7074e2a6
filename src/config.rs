//! Settings layer configuration.
//!
//! Loaded from JSON:
//!
//! ```json
//! {
//!     "namespace": "storage",
//!     "backend": { "type": "sqlite", "path": "/var/lib/device/settings.db" },
//!     "commit_interval_ms": 5000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SettingsError};
use crate::store::validate_key;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "storage";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Which blob store backs the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Volatile in-process store.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite { path: PathBuf },
}

/// Configuration of one settings store and its committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Period of the background committer; absent means commits are only
    /// made explicitly.
    #[serde(default)]
    pub commit_interval_ms: Option<u64>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            backend: BackendConfig::default(),
            commit_interval_ms: None,
        }
    }
}

impl SettingsConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SettingsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check that the namespace is a usable storage name and the commit
    /// interval is non-zero.
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.namespace)
            .map_err(|e| SettingsError::ConfigError(format!("namespace: {}", e)))?;
        if self.commit_interval_ms == Some(0) {
            return Err(SettingsError::ConfigError(
                "commit_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Background commit period, if configured.
    pub fn commit_interval(&self) -> Option<Duration> {
        self.commit_interval_ms.map(Duration::from_millis)
    }
}
