//! Configuration Module
//!
//! Handles loading and managing cache and server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::cache::validate_namespace;
use crate::error::{CacheError, Result};

/// Default expiry for primary tier entries, in seconds.
pub const DEFAULT_EXPIRY: u64 = 60 * 60;

/// Default maximum number of entries per signature.
pub const DEFAULT_LIMIT: usize = 10_000;

/// Cache engine configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of every key and top-level directory of the file tier
    pub namespace: String,
    /// Maximum number of primary entries per signature
    pub limit: usize,
    /// Default TTL in seconds, 0 = no expiry
    pub default_ttl: u64,
    /// Root directory of the file tier
    pub file_root: Option<PathBuf>,
    /// Disables the file tier
    pub disable_file: bool,
    /// Disables the primary tier
    pub disable_memory: bool,
    /// Name of the argument that partitions entries by as-of date
    pub date_arg: String,
    /// Extension of value files
    pub file_extension: String,
}

impl CacheConfig {
    /// Creates a new CacheConfig for the given namespace with default settings.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Sets the file tier root directory.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    /// Sets the per-signature entry limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the default TTL in seconds.
    pub fn with_default_ttl(mut self, ttl: u64) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the name of the as-of date argument.
    pub fn with_date_arg(mut self, name: impl Into<String>) -> Self {
        self.date_arg = name.into();
        self
    }

    /// Loads the cache configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Key namespace (default: cache1)
    /// - `CACHE_LIMIT` - Entries per signature (default: 10000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 3600)
    /// - `CACHE_FILE_ROOT` - File tier directory (default: unset, file tier disabled)
    /// - `CACHE_DISABLE_FILE` / `CACHE_DISABLE_MEMORY` - Tier switches (default: false)
    /// - `CACHE_DATE_ARG` - As-of date argument name (default: as_of)
    /// - `CACHE_FILE_EXT` - Value file extension (default: json)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            limit: parse_env("CACHE_LIMIT").unwrap_or(defaults.limit),
            default_ttl: parse_env("CACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            file_root: env::var("CACHE_FILE_ROOT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            disable_file: flag_env("CACHE_DISABLE_FILE"),
            disable_memory: flag_env("CACHE_DISABLE_MEMORY"),
            date_arg: env::var("CACHE_DATE_ARG").unwrap_or(defaults.date_arg),
            file_extension: env::var("CACHE_FILE_EXT").unwrap_or(defaults.file_extension),
        }
    }

    /// Checks that the configuration can produce well-formed keys.
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        if self.limit == 0 {
            return Err(CacheError::InvalidRequest(
                "Limit must be at least 1".to_string(),
            ));
        }
        if self.file_extension.is_empty() || self.file_extension.contains('.') {
            return Err(CacheError::InvalidRequest(format!(
                "Invalid file extension '{}'",
                self.file_extension
            )));
        }
        Ok(())
    }

    /// Returns the file tier root when the file tier is enabled.
    ///
    /// A missing root disables the file tier with a warning.
    pub fn effective_file_root(&self) -> Option<&PathBuf> {
        if self.disable_file {
            return None;
        }
        if self.file_root.is_none() {
            warn!("No file cache directory configured, disabling file cache");
        }
        self.file_root.as_ref()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache1".to_string(),
            limit: DEFAULT_LIMIT,
            default_ttl: DEFAULT_EXPIRY,
            file_root: None,
            disable_file: false,
            disable_memory: false,
            date_arg: "as_of".to_string(),
            file_extension: "json".to_string(),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache engine settings
    pub cache: CacheConfig,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Redis connection URL for the primary tier
    pub redis_url: Option<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `REDIS_URL` - Primary store URL (default: unset, in-process store)
    /// - all variables read by [`CacheConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            server_port: parse_env("SERVER_PORT").unwrap_or(3000),
            cleanup_interval: parse_env("CLEANUP_INTERVAL").unwrap_or(1),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
            cleanup_interval: 1,
            redis_url: None,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn flag_env(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache.namespace, "cache1");
        assert_eq!(config.cache.limit, 10_000);
        assert_eq!(config.cache.default_ttl, 3600);
        assert_eq!(config.cache.date_arg, "as_of");
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cleanup_interval, 1);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_NAMESPACE");
        env::remove_var("CACHE_LIMIT");
        env::remove_var("SERVER_PORT");
        env::remove_var("CLEANUP_INTERVAL");

        let config = Config::from_env();
        assert_eq!(config.cache.namespace, "cache1");
        assert_eq!(config.cache.limit, 10_000);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cleanup_interval, 1);
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        assert!(CacheConfig::new("").validate().is_err());
        assert!(CacheConfig::new("a:b").validate().is_err());
        assert!(CacheConfig::new("..").validate().is_err());
        assert!(CacheConfig::new("a/b").validate().is_err());
        assert!(CacheConfig::new("ns").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = CacheConfig::new("ns").with_limit(0);
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_file_tier_disabled_without_root() {
        let config = CacheConfig::new("ns");
        assert!(config.effective_file_root().is_none());

        let config = CacheConfig::new("ns").with_file_root("/tmp/cache");
        assert!(config.effective_file_root().is_some());

        let mut config = CacheConfig::new("ns").with_file_root("/tmp/cache");
        config.disable_file = true;
        assert!(config.effective_file_root().is_none());
    }
}
