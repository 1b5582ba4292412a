//! Query observers: streams of [`QueryResult`]s for one cache key.
//!
//! An observer keeps the caller in sync with the cache:
//!
//! 1. On start, fresh cached data is yielded as `Success`; otherwise `Loading`
//!    (with any previous data) is yielded and the key is queried
//! 2. Every later change to the key yields the new cached state
//! 3. When the key is invalidated, the observer yields `Loading` and queries
//!    again
//!
//! Changes already reflected in the last yielded result are skipped, so a
//! fetch the observer started itself is not reported twice.

use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEvent, CacheEventKind, QueryStatus, Unsubscribe};
use crate::client::QueryClient;
use crate::error::Result;
use crate::key::CacheKey;
use crate::query::{QueryResult, QueryState};

use super::{SubscriptionId, SubscriptionSource};

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A subscription that watches one key and fetches it when needed.
///
/// The key family's configuration on the client decides freshness, retries
/// and whether fetching is enabled at all.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use futures::StreamExt;
/// use storefront_query::{cache_key, QueryClient};
/// use storefront_query::subscription::QueryObserver;
///
/// # async fn demo() {
/// let client = Arc::new(QueryClient::new());
/// let observer = QueryObserver::new(
///     cache_key!["greeting"],
///     || async { Ok("hello".to_string()) },
///     client.clone(),
/// );
///
/// let mut results = observer.watch();
/// while let Some(result) = results.next().await {
///     println!("{:?}", result.data());
/// }
/// # }
/// ```
pub struct QueryObserver<T> {
    key: CacheKey,
    fetcher: Fetcher<T>,
    client: Arc<QueryClient>,
}

impl<T> QueryObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(key: CacheKey, fetcher: F, client: Arc<QueryClient>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(move || fetcher().boxed()),
            client,
        }
    }

    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Starts observing. Dropping the stream stops observing.
    pub fn watch(&self) -> BoxStream<'static, QueryResult<T>> {
        let key = self.key.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let client = Arc::clone(&self.client);

        stream::unfold(State::Initial, move |state| {
            let key = key.clone();
            let fetcher = Arc::clone(&fetcher);
            let client = Arc::clone(&client);

            async move {
                match state {
                    State::Initial => {
                        let watch = Watch::start(&client, &key);
                        let snapshot: QueryResult<T> = client.snapshot(&key);
                        let enabled = client.config_for(&key).enabled;

                        if !enabled || (snapshot.is_success() && !snapshot.is_stale()) {
                            Some((snapshot, State::Watching(watch)))
                        } else {
                            Some((loading(&snapshot), State::Fetching(watch)))
                        }
                    }

                    State::Fetching(mut watch) => loop {
                        // Anything already queued happened before this fetch starts.
                        watch.drain();
                        watch.floor = watch.version(&client, &key);

                        let fetcher = Arc::clone(&fetcher);
                        let fetched = client.query(&key, move || fetcher()).await;

                        // An invalidation that landed while fetching retired the
                        // fetch; its completion was discarded, so query again.
                        if watch.drain() && client.config_for(&key).enabled {
                            debug!(key = %key, "observer fetch superseded by invalidation");
                            continue;
                        }

                        // Report the store's view so the recorded version matches
                        // what was yielded. A newer fetch in flight means ours was
                        // superseded; its completion will arrive as an event.
                        let result = match client.store().get(&key) {
                            Some(entry) if entry.status() != QueryStatus::Loading => {
                                watch.reported = entry.version();
                                QueryResult::from_entry(&key, &entry, Instant::now())
                            }
                            _ => fetched,
                        };
                        return Some((result, State::Watching(watch)));
                    },

                    State::Watching(mut watch) => loop {
                        let event = watch.events.recv().await?;
                        let enabled = client.config_for(&key).enabled;

                        if event.kind == CacheEventKind::Invalidated && enabled {
                            if event.version <= watch.floor {
                                continue;
                            }
                            debug!(key = %key, version = event.version, "observer refetching");
                            let snapshot: QueryResult<T> = client.snapshot(&key);
                            return Some((loading(&snapshot), State::Fetching(watch)));
                        }

                        if event.version <= watch.reported {
                            continue;
                        }
                        let Some(entry) = client.store().get(&key) else {
                            continue;
                        };
                        watch.reported = entry.version();
                        let result = QueryResult::from_entry(&key, &entry, Instant::now());
                        return Some((result, State::Watching(watch)));
                    },
                }
            }
        })
        .boxed()
    }
}

fn loading<T: Clone>(snapshot: &QueryResult<T>) -> QueryResult<T> {
    QueryResult {
        state: QueryState::Loading {
            previous: snapshot.data().cloned(),
        },
    }
}

impl<T> SubscriptionSource for QueryObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = QueryResult<T>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        self.watch()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        SubscriptionId::of::<Self>(hasher.finish())
    }
}

impl<T> Hash for QueryObserver<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> Clone for QueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
            client: Arc::clone(&self.client),
        }
    }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Change feed for the observed key. Dropping it unsubscribes.
struct Watch {
    events: mpsc::UnboundedReceiver<CacheEvent>,
    /// Entry version of the last result yielded.
    reported: u64,
    /// Invalidations up to this version are covered by the latest fetch.
    floor: u64,
    _guard: Unsubscribe,
}

impl Watch {
    fn start(client: &QueryClient, key: &CacheKey) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let guard = client.store().subscribe(key, move |event| {
            let _ = tx.send(event.clone());
        });
        let version = client.store().get(key).map_or(0, |entry| entry.version());
        Self {
            events,
            reported: version,
            floor: version,
            _guard: guard,
        }
    }

    fn version(&self, client: &QueryClient, key: &CacheKey) -> u64 {
        client.store().get(key).map_or(0, |entry| entry.version())
    }

    /// Discards queued events, reporting whether one was an invalidation
    /// newer than `floor`.
    fn drain(&mut self) -> bool {
        let mut invalidated = false;
        while let Ok(event) = self.events.try_recv() {
            invalidated |= event.kind == CacheEventKind::Invalidated && event.version > self.floor;
        }
        invalidated
    }
}

/// Internal state machine for the observer stream.
enum State {
    Initial,
    Fetching(Watch),
    Watching(Watch),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use crate::config::QueryConfig;
    use crate::error::QueryError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn counting_observer(
        key: CacheKey,
        client: &Arc<QueryClient>,
    ) -> (QueryObserver<u32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let observer = QueryObserver::new(
            key,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n) }
            },
            Arc::clone(client),
        );
        (observer, calls)
    }

    async fn next<T>(results: &mut BoxStream<'static, QueryResult<T>>) -> QueryResult<T> {
        timeout(Duration::from_secs(1), results.next())
            .await
            .expect("observer should yield")
            .expect("observer stream should not end")
    }

    #[test]
    fn test_observer_id_consistency() {
        let client = Arc::new(QueryClient::new());
        let (a, _) = counting_observer(cache_key!["cart"], &client);
        let (b, _) = counting_observer(cache_key!["cart"], &client);
        let (c, _) = counting_observer(cache_key!["products", 7], &client);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_observer_id_same_key_different_type() {
        let client = Arc::new(QueryClient::new());
        let numbers = QueryObserver::new(cache_key!["data"], || async { Ok(1_u32) }, client.clone());
        let text = QueryObserver::new(
            cache_key!["data"],
            || async { Ok("x".to_string()) },
            client,
        );
        assert_ne!(numbers.id(), text.id());
    }

    #[tokio::test]
    async fn test_missing_entry_yields_loading_then_data() {
        let client = Arc::new(QueryClient::new());
        let (observer, calls) = counting_observer(cache_key!["cart"], &client);
        let mut results = observer.watch();

        let first = next(&mut results).await;
        assert_eq!(first.state, QueryState::Loading { previous: None });

        let second = next(&mut results).await;
        assert!(second.is_success());
        assert_eq!(second.data(), Some(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_yielded_without_fetch() {
        let client = Arc::new(QueryClient::with_config(
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        ));
        client.set_query_data(cache_key!["cart"], 41_u32);
        let (observer, calls) = counting_observer(cache_key!["cart"], &client);
        let mut results = observer.watch();

        let first = next(&mut results).await;
        assert_eq!(first, QueryResult::success(41));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidation_refetches_with_previous_data() {
        let client = Arc::new(QueryClient::new());
        let (observer, calls) = counting_observer(cache_key!["cart"], &client);
        let mut results = observer.watch();
        next(&mut results).await;
        assert_eq!(next(&mut results).await.data(), Some(&1));

        assert_eq!(client.invalidate(&cache_key!["cart"]), 1);

        let loading = next(&mut results).await;
        assert_eq!(loading.state, QueryState::Loading { previous: Some(1) });
        let refetched = next(&mut results).await;
        assert_eq!(refetched.data(), Some(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_direct_write_is_yielded() {
        let client = Arc::new(QueryClient::new());
        let (observer, _) = counting_observer(cache_key!["cart"], &client);
        let mut results = observer.watch();
        next(&mut results).await;
        next(&mut results).await;

        client.set_query_data(cache_key!["cart"], 99_u32);
        assert_eq!(next(&mut results).await.data(), Some(&99));
    }

    #[tokio::test]
    async fn test_disabled_observer_never_fetches() {
        let client = Arc::new(QueryClient::new());
        client.set_query_defaults(cache_key!["products"], QueryConfig::default().enabled(false));
        let (observer, calls) = counting_observer(cache_key!["products", ""], &client);
        let mut results = observer.watch();

        assert_eq!(next(&mut results).await.state, QueryState::Idle);
        client.invalidate(&cache_key!["products"]);
        client.set_query_data(cache_key!["products", ""], 5_u32);
        assert_eq!(next(&mut results).await.data(), Some(&5));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_yielded_as_error() {
        let client = Arc::new(QueryClient::new());
        let observer: QueryObserver<u32> = QueryObserver::new(
            cache_key!["cart"],
            || async { Err(QueryError::Network("offline".into())) },
            client,
        );
        let mut results = observer.watch();
        next(&mut results).await;

        let failed = next(&mut results).await;
        assert_eq!(failed.error(), Some(&QueryError::Network("offline".into())));
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let client = Arc::new(QueryClient::new());
        let (observer, _) = counting_observer(cache_key!["cart"], &client);
        let mut results = observer.watch();
        next(&mut results).await;
        assert_eq!(client.store().subscriber_count(&cache_key!["cart"]), 1);

        drop(results);
        assert_eq!(client.store().subscriber_count(&cache_key!["cart"]), 0);
    }
}
