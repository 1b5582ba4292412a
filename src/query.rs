//! Query execution with caching, deduplication and stale-completion discard.
//!
//! [`QueryEngine::query`] answers a read for a [`CacheKey`]:
//!
//! 1. If the cached entry is fresh, it is returned without any fetch
//! 2. If a fetch for the key is already in flight, the caller joins it
//! 3. Otherwise the fetch function is spawned as a task, the entry moves to
//!    `Loading`, and the task writes its result back when it resolves
//!
//! Every fetch carries a per-key generation. Only the completion whose
//! generation is still current is written to the cache; completions of
//! superseded fetches are discarded.
//!
//! # Example
//!
//! ```rust,no_run
//! use storefront_query::{cache_key, CacheStore, QueryConfig, QueryEngine};
//!
//! # async fn demo() {
//! let engine = QueryEngine::new(CacheStore::new());
//! let result = engine
//!     .query(&cache_key!["answer"], || async { Ok(42_u32) }, &QueryConfig::default())
//!     .await;
//! assert_eq!(result.data(), Some(&42));
//! # }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStore, Lookup, Payload, QueryStatus, SharedFetch};
use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::key::CacheKey;
use crate::retry::RetryPolicy;

/// The state of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// Nothing cached and nothing fetched yet (or the query is disabled).
    Idle,
    /// A fetch is in flight. `previous` holds the last known value, if any.
    Loading { previous: Option<T> },
    /// Query succeeded with data.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale and will be refetched on the next read.
        is_stale: bool,
    },
    /// Query failed. `previous` holds the last known value, if any.
    Error {
        error: QueryError,
        previous: Option<T>,
    },
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    pub const fn idle() -> Self {
        Self {
            state: QueryState::Idle,
        }
    }

    pub const fn success(data: T) -> Self {
        Self {
            state: QueryState::Success {
                data,
                is_stale: false,
            },
        }
    }

    /// Returns the best data available for display.
    ///
    /// This is the fetched value on success and the last known value while
    /// loading or after an error.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            QueryState::Loading {
                previous: Some(data),
            }
            | QueryState::Error {
                previous: Some(data),
                ..
            } => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub const fn status(&self) -> QueryStatus {
        match self.state {
            QueryState::Idle => QueryStatus::Idle,
            QueryState::Loading { .. } => QueryStatus::Loading,
            QueryState::Success { .. } => QueryStatus::Success,
            QueryState::Error { .. } => QueryStatus::Error,
        }
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading { .. })
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error { .. })
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }

    /// Converts into the fetched value or the error.
    ///
    /// # Errors
    ///
    /// Returns the query error for a failed query, and
    /// [`QueryError::Aborted`] for a query that is idle or still loading.
    pub fn into_result(self) -> Result<T> {
        match self.state {
            QueryState::Success { data, .. } => Ok(data),
            QueryState::Error { error, .. } => Err(error),
            QueryState::Idle | QueryState::Loading { .. } => {
                Err(QueryError::Aborted("query has not resolved".to_string()))
            }
        }
    }

    /// Maps the data type, keeping the state.
    pub fn map<U>(self, f: impl Fn(T) -> U) -> QueryResult<U> {
        let state = match self.state {
            QueryState::Idle => QueryState::Idle,
            QueryState::Loading { previous } => QueryState::Loading {
                previous: previous.map(&f),
            },
            QueryState::Success { data, is_stale } => QueryState::Success {
                data: f(data),
                is_stale,
            },
            QueryState::Error { error, previous } => QueryState::Error {
                error,
                previous: previous.map(&f),
            },
        };
        QueryResult { state }
    }
}

impl<T: Clone + 'static> QueryResult<T> {
    /// Builds a typed view of a cache entry.
    pub fn from_entry(key: &CacheKey, entry: &CacheEntry, now: Instant) -> Self {
        if entry.has_data() && entry.data::<T>().is_none() {
            return Self {
                state: QueryState::Error {
                    error: QueryError::TypeMismatch { key: key.clone() },
                    previous: None,
                },
            };
        }
        let data = entry.data::<T>().cloned();
        let state = match (entry.status(), data) {
            (QueryStatus::Success, Some(data)) => QueryState::Success {
                data,
                is_stale: !entry.is_fresh(now),
            },
            (QueryStatus::Loading, previous) => QueryState::Loading { previous },
            (QueryStatus::Error, previous) => QueryState::Error {
                error: entry
                    .error()
                    .cloned()
                    .unwrap_or_else(|| QueryError::Aborted("missing error detail".to_string())),
                previous,
            },
            (QueryStatus::Idle | QueryStatus::Success, _) => QueryState::Idle,
        };
        Self { state }
    }
}

/// Runs queries against a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: CacheStore,
}

impl QueryEngine {
    #[must_use]
    pub const fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the current cached state for `key` without fetching.
    pub fn snapshot<T: Clone + 'static>(&self, key: &CacheKey) -> QueryResult<T> {
        self.store
            .read(key)
            .map_or_else(QueryResult::idle, |entry| {
                QueryResult::from_entry(key, &entry, Instant::now())
            })
    }

    /// Reads `key`, fetching with `fetcher` when the cache cannot answer.
    ///
    /// Fresh data is returned immediately; a fetch already in flight is
    /// joined; otherwise one fetch is started. All callers that share a fetch
    /// observe the same value or the same error. When `config.enabled` is
    /// `false` nothing is fetched and the cached state is returned.
    pub async fn query<T, F, Fut>(
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
        self.run(key, fetcher, config, false).await
    }

    /// Starts a new fetch for `key` even if the data is fresh or a fetch is
    /// in flight. The older fetch is superseded and its completion discarded.
    pub async fn refetch<T, F, Fut>(
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
        self.run(key, fetcher, config, true).await
    }

    async fn run<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        config: &QueryConfig,
        force: bool,
    ) -> QueryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !config.enabled {
            debug!(key = %key, "query disabled, serving cache only");
            return self.snapshot(key);
        }

        let lookup = self.store.begin_or_join(key, config.stale_time, force, |generation| {
            self.spawn_fetch(key.clone(), generation, fetcher, config.retry.clone())
        });

        let fetch = match lookup {
            Lookup::Fresh(entry) => {
                debug!(key = %key, "cache hit");
                return QueryResult::from_entry(key, &entry, Instant::now());
            }
            Lookup::Joined(fetch) | Lookup::Started(fetch) => fetch,
        };

        match fetch.await {
            Ok(payload) => match payload.downcast_ref::<T>() {
                Some(data) => QueryResult::success(data.clone()),
                None => QueryResult {
                    state: QueryState::Error {
                        error: QueryError::TypeMismatch { key: key.clone() },
                        previous: None,
                    },
                },
            },
            Err(error) => {
                let previous = self
                    .store
                    .get(key)
                    .and_then(|entry| entry.data::<T>().cloned());
                QueryResult {
                    state: QueryState::Error { error, previous },
                }
            }
        }
    }

    fn spawn_fetch<T, F, Fut>(
        &self,
        key: CacheKey,
        generation: u64,
        mut fetcher: F,
        retry: RetryPolicy,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::spawn(async move {
            let attempt = retry.run(&mut fetcher);
            let result = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result.map(|data| Arc::new(data) as Payload),
                Err(_) => Err(QueryError::Aborted("fetch function panicked".to_string())),
            };
            store.complete_fetch(&key, generation, &result);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(QueryError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_query_result_data() {
        let result = QueryResult::success(42);
        assert_eq!(result.data(), Some(&42));

        let result: QueryResult<i32> = QueryResult::idle();
        assert_eq!(result.data(), None);

        let result = QueryResult {
            state: QueryState::Loading { previous: Some(1) },
        };
        assert_eq!(result.data(), Some(&1));

        let result = QueryResult {
            state: QueryState::Error {
                error: QueryError::Network("down".into()),
                previous: Some(2),
            },
        };
        assert_eq!(result.data(), Some(&2));
        assert!(result.error().is_some());
    }

    #[test]
    fn test_query_result_predicates() {
        let loading: QueryResult<i32> = QueryResult {
            state: QueryState::Loading { previous: None },
        };
        assert!(loading.is_loading());
        assert!(!loading.is_success());
        assert!(!loading.is_error());
        assert!(!loading.is_stale());

        let stale = QueryResult {
            state: QueryState::Success {
                data: 42,
                is_stale: true,
            },
        };
        assert!(stale.is_success());
        assert!(stale.is_stale());
        assert_eq!(stale.status(), QueryStatus::Success);

        let error: QueryResult<i32> = QueryResult {
            state: QueryState::Error {
                error: QueryError::Network("x".into()),
                previous: None,
            },
        };
        assert!(error.is_error());
        assert!(!error.is_stale());
        assert_eq!(error.status(), QueryStatus::Error);
    }

    #[test]
    fn test_map_and_into_result() {
        let result = QueryResult::success(21).map(|n| n * 2);
        assert_eq!(result.into_result(), Ok(42));

        let idle: QueryResult<i32> = QueryResult::idle();
        assert!(matches!(idle.into_result(), Err(QueryError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_query_fetches_and_caches() {
        let engine = QueryEngine::new(CacheStore::new());
        let key = cache_key!["numbers"];

        let result = engine
            .query(&key, || async { Ok(7_u32) }, &QueryConfig::default())
            .await;
        assert_eq!(result, QueryResult::success(7));

        let entry = engine.store().get(&key).unwrap();
        assert_eq!(entry.status(), QueryStatus::Success);
        assert_eq!(entry.data::<u32>(), Some(&7));
        assert!(!entry.is_fetching());
    }

    #[tokio::test]
    async fn test_disabled_query_does_not_fetch() {
        let engine = QueryEngine::new(CacheStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: QueryResult<u32> = engine
            .query(
                &cache_key!["products", ""],
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1) }
                },
                &QueryConfig::default().enabled(false),
            )
            .await;

        assert_eq!(result.state, QueryState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let engine = QueryEngine::new(CacheStore::new());
        let key = cache_key!["thing"];
        engine
            .store()
            .put(key.clone(), CacheEntry::success(1_u8, Duration::from_secs(60)));

        let result: QueryResult<String> = engine.snapshot(&key);
        assert!(matches!(
            result.error(),
            Some(QueryError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_fetcher_resolves_as_error() {
        let engine = QueryEngine::new(CacheStore::new());
        let key = cache_key!["boom"];

        fn explode() -> Result<u8> {
            panic!("fetcher exploded")
        }

        let result: QueryResult<u8> = engine
            .query(&key, || async { explode() }, &QueryConfig::default())
            .await;

        assert!(matches!(result.error(), Some(QueryError::Aborted(_))));
        let entry = engine.store().get(&key).unwrap();
        assert_eq!(entry.status(), QueryStatus::Error);
        assert!(!entry.is_fetching());
    }
}
