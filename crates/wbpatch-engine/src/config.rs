//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is valid:
//!
//! ```toml
//! wait_lock_secs = 5
//! backup = true
//! lock_backoff_initial_ms = 10
//! lock_backoff_max_ms = 250
//! policy_path = "wbpatch-policy.yaml"
//! ```

use crate::lock::LockManager;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file looked up beside the document
pub const CONFIG_FILE_NAME: &str = "wbpatch.toml";

/// Policy file looked up beside the document when none is configured
pub const POLICY_FILE_NAME: &str = "wbpatch-policy.yaml";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Seconds to wait for a held lock; 0 fails immediately
    pub wait_lock_secs: u64,
    /// Write a backup before persisting
    pub backup: bool,
    /// First lock retry delay
    pub lock_backoff_initial_ms: u64,
    /// Lock retry delay cap
    pub lock_backoff_max_ms: u64,
    /// Policy file; relative paths resolve against the config file's directory
    pub policy_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_lock_secs: 0,
            backup: true,
            lock_backoff_initial_ms: 10,
            lock_backoff_max_ms: 250,
            policy_path: None,
        }
    }
}

impl EngineConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// Returns error on malformed TOML or unknown keys
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file; a relative `policy_path` is resolved against the
    /// file's directory
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_text(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(policy) = config.policy_path.as_mut() {
            if policy.is_relative() {
                if let Some(dir) = path.parent() {
                    *policy = dir.join(&*policy);
                }
            }
        }
        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// `wbpatch.toml` beside `document` if present, otherwise defaults
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn discover(document: &Path) -> Result<Self, ConfigError> {
        let candidate = sibling(document, CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Set lock wait
    #[inline]
    #[must_use]
    pub fn with_wait_lock_secs(mut self, secs: u64) -> Self {
        self.wait_lock_secs = secs;
        self
    }

    /// Set backup
    #[inline]
    #[must_use]
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Set policy file
    #[inline]
    #[must_use]
    pub fn with_policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = Some(path.into());
        self
    }

    /// Lock wait as a duration
    #[inline]
    #[must_use]
    pub fn wait_lock(&self) -> Duration {
        Duration::from_secs(self.wait_lock_secs)
    }

    /// Lock manager using the configured backoff
    #[must_use]
    pub fn lock_manager(&self) -> LockManager {
        LockManager::new().with_backoff(
            Duration::from_millis(self.lock_backoff_initial_ms),
            Duration::from_millis(self.lock_backoff_max_ms),
        )
    }

    /// Policy for `document`: the configured file, else `wbpatch-policy.yaml`
    /// beside the document, else none
    ///
    /// # Errors
    /// Returns error if a configured or discovered policy fails to load
    pub fn load_policy(&self, document: &Path) -> Result<Option<Policy>, ConfigError> {
        if let Some(path) = &self.policy_path {
            return Policy::load(path).map(Some);
        }
        let candidate = sibling(document, POLICY_FILE_NAME);
        if candidate.is_file() {
            Policy::load(&candidate).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn sibling(document: &Path, name: &str) -> PathBuf {
    document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from(name), |dir| dir.join(name))
}

pub(crate) fn read_text(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_is_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn parses_fields() {
        let config = EngineConfig::from_toml_str("wait_lock_secs = 3\nbackup = false\n").unwrap();
        assert_eq!(config.wait_lock(), Duration::from_secs(3));
        assert!(!config.backup);
        assert_eq!(config.lock_backoff_max_ms, 250);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("wait_lock = 3"),
            Err(ConfigError::InvalidToml(_))
        ));
    }

    #[test]
    fn discover_beside_document_resolves_policy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "policy_path = \"rules.yaml\"\n",
        )
        .unwrap();
        let config = EngineConfig::discover(&dir.path().join("book.json")).unwrap();
        assert_eq!(config.policy_path, Some(dir.path().join("rules.yaml")));
    }

    #[test]
    fn discover_without_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::discover(&dir.path().join("book.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.load_policy(&dir.path().join("book.json")).unwrap().is_none());
    }
}
