//! World configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use terrastream::{StoreConfig, StoreResult};

/// Configuration for a [`HostWorld`](crate::HostWorld).
///
/// ```toml
/// worker_threads = 4
/// save_dir = "world"
/// view_radius = 2
/// seed = 42
///
/// [store]
/// unload_delay_ticks = 200
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Worker threads shared by loading, generation and saving.
    pub worker_threads: usize,
    /// Directory holding the region files.
    pub save_dir: PathBuf,
    /// Regions anchored in each direction around the view centre.
    pub view_radius: u32,
    /// World generation seed.
    pub seed: u64,
    /// Store tuning.
    pub store: StoreConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            save_dir: PathBuf::from("world"),
            view_radius: 2,
            seed: 0,
            store: StoreConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Parses a config from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`](terrastream::StoreError::Config) on
    /// malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.worker_threads = config.worker_threads.max(1);
        config.store = config.store.sanitized();
        Ok(config)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`](terrastream::StoreError::Io) if the file
    /// cannot be read, otherwise as [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_store_table() {
        let config = WorldConfig::from_toml_str(
            "worker_threads = 0\nsave_dir = \"/tmp/w\"\n[store]\nunload_delay_ticks = 7\n",
        )
        .unwrap();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.save_dir, PathBuf::from("/tmp/w"));
        assert_eq!(config.view_radius, 2);
        assert_eq!(config.store.unload_delay_ticks, 7);
        assert_eq!(config.store.lock_stripes, StoreConfig::default().lock_stripes);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(WorldConfig::from_toml_str("view_radius = 1\nfog = true\n").is_err());
    }
}
