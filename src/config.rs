//! Store configuration with tier-based overrides: built-in defaults, then
//! an optional YAML file, then environment variables.

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of simultaneously open project stores.
    pub cache_capacity: usize,
    /// How long a connection waits on a lock held by another process.
    pub busy_timeout_ms: u32,
    /// Location of the shared global store. Platform data directory when
    /// unset.
    pub global_store_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            global_store_path: None,
        }
    }
}

impl StoreConfig {
    /// Read a config file. A missing file is not an error; defaults apply.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::storage(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|e| {
            StoreError::validation("config", format!("parse {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Config from file (when given) with environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("ORC_CACHE_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(value) if value > 0 => self.cache_capacity = value,
                _ => warn!(value = %raw, "ignoring unusable ORC_CACHE_CAPACITY"),
            }
        }
        if let Ok(raw) = std::env::var("ORC_BUSY_TIMEOUT_MS") {
            match raw.parse::<u32>() {
                Ok(value) => self.busy_timeout_ms = value,
                Err(_) => warn!(value = %raw, "ignoring unusable ORC_BUSY_TIMEOUT_MS"),
            }
        }
        if let Ok(raw) = std::env::var("ORC_GLOBAL_STORE")
            && !raw.is_empty()
        {
            self.global_store_path = Some(PathBuf::from(raw));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(config.global_store_path.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = StoreConfig::load_from(Path::new("/nonexistent/orc.yaml")).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orc.yaml");
        std::fs::write(&path, "cache_capacity: 3\n").unwrap();

        let config = StoreConfig::load_from(&path).unwrap();
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orc.yaml");
        std::fs::write(&path, "cache_capacity: [not a number\n").unwrap();

        assert!(matches!(
            StoreConfig::load_from(&path),
            Err(StoreError::Validation { .. })
        ));
    }
}
