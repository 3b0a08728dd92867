use std::time::Duration;

use raidsync_common::error::CommonError;

/// Configuration for the stale-while-revalidate cache
#[derive(Debug, Clone)]
pub struct SwrCacheConfig {
    /// TTL applied when the caller does not specify one
    pub default_ttl: Duration,
    /// Stale window as a multiple of the fresh TTL
    /// (1.0 means the stale window equals the fresh window)
    pub stale_multiplier: f64,
    /// Maximum number of entries held in the in-memory tier
    pub l1_max_entries: usize,
    /// Key patterns promoted into the in-memory tier
    pub hot_paths: Vec<String>,
    /// Whether to collect detailed access metrics
    pub track_metrics: bool,
}

impl Default for SwrCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            stale_multiplier: 1.0,
            l1_max_entries: 1_000,
            hot_paths: Vec::new(),
            track_metrics: true,
        }
    }
}

impl SwrCacheConfig {
    /// Create a new configuration builder
    pub fn builder() -> SwrCacheConfigBuilder {
        SwrCacheConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.default_ttl.is_zero() {
            return Err(CommonError::config_field("default_ttl", "must be greater than 0"));
        }
        if self.stale_multiplier < 0.0 {
            return Err(CommonError::config_field("stale_multiplier", "must not be negative"));
        }
        if self.l1_max_entries == 0 {
            return Err(CommonError::config_field("l1_max_entries", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for SwrCacheConfig
#[derive(Debug, Default)]
pub struct SwrCacheConfigBuilder {
    config: SwrCacheConfig,
}

impl SwrCacheConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self { config: SwrCacheConfig::default() }
    }

    /// Set the default TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Set the stale window multiplier
    pub fn stale_multiplier(mut self, multiplier: f64) -> Self {
        self.config.stale_multiplier = multiplier;
        self
    }

    /// Set the in-memory tier capacity
    pub fn l1_max_entries(mut self, max: usize) -> Self {
        self.config.l1_max_entries = max;
        self
    }

    /// Add a hot-path key pattern
    pub fn hot_path(mut self, pattern: impl Into<String>) -> Self {
        self.config.hot_paths.push(pattern.into());
        self
    }

    /// Enable or disable metrics tracking
    pub fn track_metrics(mut self, enabled: bool) -> Self {
        self.config.track_metrics = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SwrCacheConfig, CommonError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache configuration.
    use super::*;

    /// Validates `SwrCacheConfig::default` values.
    ///
    /// Assertions:
    /// - Confirms the stale window defaults to 1.0x the fresh TTL.
    #[test]
    fn test_defaults() {
        let config = SwrCacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.stale_multiplier, 1.0);
        assert_eq!(config.l1_max_entries, 1_000);
        assert!(config.hot_paths.is_empty());
    }

    /// Validates builder assembly and validation.
    ///
    /// Assertions:
    /// - Confirms all builder setters land in the built config.
    /// - Confirms out-of-range values are rejected.
    #[test]
    fn test_builder() {
        let config = SwrCacheConfig::builder()
            .default_ttl(Duration::from_secs(60))
            .stale_multiplier(2.0)
            .l1_max_entries(50)
            .hot_path("^guild:")
            .track_metrics(false)
            .build()
            .unwrap();

        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.stale_multiplier, 2.0);
        assert_eq!(config.l1_max_entries, 50);
        assert_eq!(config.hot_paths, vec!["^guild:".to_string()]);
        assert!(!config.track_metrics);

        assert!(SwrCacheConfig::builder().default_ttl(Duration::ZERO).build().is_err());
        assert!(SwrCacheConfig::builder().stale_multiplier(-0.5).build().is_err());
        assert!(SwrCacheConfig::builder().l1_max_entries(0).build().is_err());
    }
}
