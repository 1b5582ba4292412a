//! The query client: one cache, its engines, and per-family configuration.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::{QueryConfig, QueryDefaults};
use crate::error::Result;
use crate::key::CacheKey;
use crate::mutation::{Mutation, MutationEngine, MutationResult};
use crate::query::{QueryEngine, QueryResult};

/// A client for managing the query cache, queries and mutations.
///
/// The `QueryClient` is the central state manager. It owns:
/// - the [`CacheStore`] every reader and writer shares
/// - a [`QueryEngine`] and a [`MutationEngine`] bound to that store
/// - per-key-family [`QueryConfig`] defaults
///
/// Construct one per application and share it behind an `Arc`; clones share
/// the same cache.
///
/// # Example
///
/// ```rust
/// use storefront_query::{cache_key, QueryClient, QueryConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let client = Arc::new(QueryClient::new());
/// client.set_query_defaults(
///     cache_key!["currentUser"],
///     QueryConfig::default().with_stale_time(Duration::from_secs(300)),
/// );
/// assert_eq!(
///     client.config_for(&cache_key!["currentUser"]).stale_time,
///     Duration::from_secs(300),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct QueryClient {
    store: CacheStore,
    queries: QueryEngine,
    mutations: MutationEngine,
    defaults: Arc<RwLock<QueryDefaults>>,
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given default configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let store = CacheStore::new();
        let defaults = Arc::new(RwLock::new(QueryDefaults::new(config)));
        Self {
            queries: QueryEngine::new(store.clone()),
            mutations: MutationEngine::new(store.clone(), Arc::clone(&defaults)),
            store,
            defaults,
        }
    }

    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Sets the configuration for the key family under `prefix`.
    pub fn set_query_defaults(&self, prefix: CacheKey, config: QueryConfig) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(prefix, config);
    }

    /// Resolves the configuration that applies to `key`.
    pub fn config_for(&self, key: &CacheKey) -> QueryConfig {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .clone()
    }

    /// Reads `key` using its family configuration.
    pub async fn query<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> QueryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let config = self.config_for(key);
        self.queries.query(key, fetcher, &config).await
    }

    /// Reads `key` with an explicit configuration.
    pub async fn query_with<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        config: &QueryConfig,
    ) -> QueryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.queries.query(key, fetcher, config).await
    }

    /// Forces a new fetch of `key`, superseding any fetch in flight.
    pub async fn refetch<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> QueryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let config = self.config_for(key);
        self.queries.refetch(key, fetcher, &config).await
    }

    /// Returns the cached state of `key` without fetching.
    pub fn snapshot<T: Clone + 'static>(&self, key: &CacheKey) -> QueryResult<T> {
        self.queries.snapshot(key)
    }

    /// Runs a mutation and applies its cache effects on success.
    pub async fn mutate<I, O>(&self, mutation: &Mutation<I, O>, input: I) -> MutationResult<O> {
        self.mutations.mutate(mutation, input).await
    }

    /// Marks every entry under `prefix` as stale. Returns the count touched.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.store.invalidate(prefix)
    }

    /// Writes `data` for `key` as a freshly fetched value.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: CacheKey, data: T) {
        let stale_time = self.config_for(&key).stale_time;
        self.store.put(key, CacheEntry::success(data, stale_time));
    }

    /// Returns the cached value for `key`, if present and of type `T`.
    pub fn get_query_data<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        self.store.get(key)?.data::<T>().cloned()
    }

    /// Removes entries idle for longer than the default `cache_time`.
    pub fn collect_garbage(&self) -> usize {
        let cache_time = self
            .defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_config()
            .cache_time;
        self.store.collect_garbage(cache_time)
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use std::time::Duration;

    #[test]
    fn test_query_client_new() {
        let client = QueryClient::new();
        assert!(client.store().is_empty());
        assert_eq!(client.config_for(&cache_key!["any"]).stale_time, Duration::ZERO);
    }

    #[test]
    fn test_query_client_with_config() {
        let config = QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300));
        let client = QueryClient::with_config(config);
        let resolved = client.config_for(&cache_key!["cart"]);
        assert_eq!(resolved.stale_time, Duration::from_secs(30));
        assert_eq!(resolved.cache_time, Duration::from_secs(300));
    }

    #[test]
    fn test_set_and_get_query_data() {
        let client = QueryClient::new();
        assert!(client.get_query_data::<i32>(&cache_key!["key1"]).is_none());

        client.set_query_data(cache_key!["key1"], 42);
        assert_eq!(client.get_query_data::<i32>(&cache_key!["key1"]), Some(42));
        assert!(client.get_query_data::<String>(&cache_key!["key1"]).is_none());
    }

    #[test]
    fn test_clones_share_cache() {
        let client = QueryClient::new();
        let other = client.clone();
        client.set_query_data(cache_key!["shared"], "v".to_string());
        assert_eq!(
            other.get_query_data::<String>(&cache_key!["shared"]),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_family_stale_time_applies() {
        let client = QueryClient::new();
        client.set_query_defaults(
            cache_key!["currentUser"],
            QueryConfig::default().with_stale_time(Duration::from_secs(300)),
        );

        let result = client
            .query(&cache_key!["currentUser"], || async { Ok("ada".to_string()) })
            .await;
        assert!(result.is_success());

        let entry = client.store().get(&cache_key!["currentUser"]).unwrap();
        assert_eq!(entry.stale_time(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_query_with_overrides_family_config() {
        let client = QueryClient::new();
        let key = cache_key!["products", "7"];

        let disabled = QueryConfig::default().enabled(false);
        let result = client.query_with(&key, || async { Ok(1_u32) }, &disabled).await;
        assert_eq!(result.state, crate::query::QueryState::Idle);
        assert!(client.store().get(&key).is_none());

        let long = QueryConfig::default().with_stale_time(Duration::from_secs(60));
        client.query_with(&key, || async { Ok(1_u32) }, &long).await;
        let cached = client.query_with(&key, || async { Ok(2_u32) }, &long).await;
        assert_eq!(cached.data(), Some(&1));

        // The family default (stale immediately) still applies to plain reads.
        let fresh = client.query(&key, || async { Ok(3_u32) }).await;
        assert_eq!(fresh.data(), Some(&3));
    }
}
