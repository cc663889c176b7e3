//! Store configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::StoreResult;

/// Configuration for a [`RegionStore`](crate::RegionStore).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Number of striped coordinate locks.
    pub lock_stripes: usize,
    /// Ticks an unanchored region stays resident before eviction.
    pub unload_delay_ticks: u32,
    /// Ticks between automatic saves of a dirty primary region.
    pub autosave_interval_ticks: u64,
    /// Budget for the shutdown save drain (ms).
    pub drain_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 64,
            unload_delay_ticks: 200,
            autosave_interval_ticks: 1200,
            drain_timeout_ms: 10_000,
        }
    }
}

impl StoreConfig {
    /// Production config: more stripes, longer unload grace.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            lock_stripes: 256,
            unload_delay_ticks: 600,
            autosave_interval_ticks: 3600,
            drain_timeout_ms: 30_000,
        }
    }

    /// Parses a config from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`](crate::StoreError::Config) if the
    /// document is malformed or names an unknown key.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Returns the drain budget as a `Duration`.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Clamps values that would make the store unusable.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.lock_stripes = self.lock_stripes.max(1);
        self.autosave_interval_ticks = self.autosave_interval_ticks.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml_str("unload_delay_ticks = 5\n").unwrap();
        assert_eq!(config.unload_delay_ticks, 5);
        assert_eq!(config.lock_stripes, StoreConfig::default().lock_stripes);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(StoreConfig::from_toml_str("lock_stripe = 3\n").is_err());
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let config = StoreConfig::from_toml_str("lock_stripes = 0\n").unwrap();
        assert_eq!(config.lock_stripes, 1);
    }
}
