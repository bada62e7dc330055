// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration for a cache engine.
//!
//! # Example: Using defaults
//!
//! ```rust
//! use semiocache::CacheConfig;
//!
//! let config = CacheConfig::default();
//! ```
//!
//! # Example: Custom configuration
//!
//! ```rust
//! use semiocache::CacheConfigBuilder;
//! use std::time::Duration;
//!
//! let config = CacheConfigBuilder::with_defaults()
//!     .write_flush_delay(Duration::from_millis(100))
//!     .cache_dir("/var/cache/semiocache")
//!     .build();
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`CacheEngine`](crate::CacheEngine).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Delay between the last response of a read wave and the deferred
    /// write flush. Default: 1 second.
    pub write_flush_delay: Duration,

    /// Expiration applied to key-value cache entries at write time.
    /// Default: 20 hours.
    pub key_value_ttl: Duration,

    /// Directory for disk-backed databases. `None` keeps every database
    /// in memory only. Default: `None`.
    pub cache_dir: Option<PathBuf>,

    /// Timeout for backend fetches, applied when the engine builds its
    /// own HTTP fetcher
    /// ([`CacheEngine::with_http_fetcher`](crate::CacheEngine::with_http_fetcher)).
    /// Default: 30 seconds.
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            write_flush_delay: Duration::from_secs(1),
            key_value_ttl: Duration::from_secs(20 * 60 * 60),
            cache_dir: None,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Fluent builder for [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Start from the default configuration.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Set the deferred-write flush delay.
    pub fn write_flush_delay(mut self, delay: Duration) -> Self {
        self.config.write_flush_delay = delay;
        self
    }

    /// Set the key-value entry expiration.
    pub fn key_value_ttl(mut self, ttl: Duration) -> Self {
        self.config.key_value_ttl = ttl;
        self
    }

    /// Persist databases under the given directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Set the backend fetch timeout.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    /// Finish building.
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.write_flush_delay, Duration::from_secs(1));
        assert_eq!(config.key_value_ttl, Duration::from_secs(72_000));
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = CacheConfigBuilder::with_defaults()
            .write_flush_delay(Duration::from_millis(5))
            .key_value_ttl(Duration::from_secs(60))
            .cache_dir("/tmp/semiocache")
            .build();

        assert_eq!(config.write_flush_delay, Duration::from_millis(5));
        assert_eq!(config.key_value_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/semiocache")));
    }
}
