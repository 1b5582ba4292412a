//! Query configuration and per-key-family defaults.

use std::time::Duration;

use crate::key::CacheKey;
use crate::retry::RetryPolicy;

/// Configuration for query behavior.
///
/// This controls how queries cache data and when they consider it stale.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// How long data is considered fresh before becoming stale.
    ///
    /// When data is fresh, queries will use cached data without refetching.
    /// Once stale, the next read refetches while cached data stays visible.
    pub stale_time: Duration,

    /// How long an unread entry is retained before garbage collection may
    /// remove it.
    pub cache_time: Duration,

    /// Retry policy applied to the fetch function.
    pub retry: RetryPolicy,

    /// When `false`, queries never fetch and only expose cached data.
    pub enabled: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
            retry: RetryPolicy::none(),
            enabled: true,
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Per-key-family configuration.
///
/// Each family is identified by a key prefix. Lookups pick the family with
/// the longest matching prefix and fall back to the default.
#[derive(Debug, Clone, Default)]
pub struct QueryDefaults {
    default: QueryConfig,
    families: Vec<(CacheKey, QueryConfig)>,
}

impl QueryDefaults {
    #[must_use]
    pub fn new(default: QueryConfig) -> Self {
        Self {
            default,
            families: Vec::new(),
        }
    }

    /// Sets the configuration for every key starting with `prefix`,
    /// replacing any previous configuration for that exact prefix.
    pub fn set(&mut self, prefix: CacheKey, config: QueryConfig) {
        match self.families.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, existing)) => *existing = config,
            None => self.families.push((prefix, config)),
        }
    }

    /// Resolves the configuration for `key`.
    pub fn get(&self, key: &CacheKey) -> &QueryConfig {
        self.families
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(&self.default, |(_, config)| config)
    }

    pub const fn default_config(&self) -> &QueryConfig {
        &self.default
    }
}
