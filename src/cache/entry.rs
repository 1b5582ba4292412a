use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::QueryError;

/// Type-erased cached value. The cache never inspects payloads.
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// A fetch that any number of callers can await.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Payload, QueryError>>>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never fetched.
    Idle,
    /// A fetch is in flight. Previous data, if any, is still available.
    Loading,
    /// The last fetch (or direct write) succeeded.
    Success,
    /// The last fetch failed. Previous data, if any, is still available.
    Error,
}

/// The one outstanding fetch for a key.
#[derive(Clone)]
pub(crate) struct InFlight {
    pub(crate) generation: u64,
    pub(crate) fetch: SharedFetch,
}

/// A cached entry with freshness bookkeeping.
///
/// Entries are owned by [`CacheStore`](super::CacheStore); readers only ever
/// see clones.
#[derive(Clone)]
pub struct CacheEntry {
    data: Option<Payload>,
    status: QueryStatus,
    error: Option<QueryError>,
    fetched_at: Option<Instant>,
    stale_time: Duration,
    pub(crate) generation: u64,
    pub(crate) version: u64,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) last_accessed: Instant,
}

impl CacheEntry {
    /// Creates an idle entry with no data.
    #[must_use]
    pub fn new(stale_time: Duration) -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            fetched_at: None,
            stale_time,
            generation: 0,
            version: 0,
            in_flight: None,
            last_accessed: Instant::now(),
        }
    }

    /// Creates a successful entry holding `data`, fetched now.
    #[must_use]
    pub fn success<T: Send + Sync + 'static>(data: T, stale_time: Duration) -> Self {
        let now = Instant::now();
        Self {
            data: Some(Arc::new(data)),
            status: QueryStatus::Success,
            fetched_at: Some(now),
            last_accessed: now,
            ..Self::new(stale_time)
        }
    }

    /// Returns the cached value if present and of type `T`.
    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.data.as_deref()?.downcast_ref::<T>()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub const fn status(&self) -> QueryStatus {
        self.status
    }

    pub const fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    /// Instant of the last successful fetch, cleared by invalidation.
    pub const fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub const fn stale_time(&self) -> Duration {
        self.stale_time
    }

    /// Monotonic change counter for this key.
    pub const fn version(&self) -> u64 {
        self.version
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Checks whether the entry can be served without refetching.
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.status == QueryStatus::Success
            && self
                .fetched_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.stale_time)
    }

    /// Checks if this entry should be garbage collected based on cache time.
    pub fn should_gc(&self, now: Instant, cache_time: Duration) -> bool {
        self.in_flight.is_none() && now.saturating_duration_since(self.last_accessed) > cache_time
    }

    pub(crate) fn payload(&self) -> Option<Payload> {
        self.data.clone()
    }

    pub(crate) const fn set_stale_time(&mut self, stale_time: Duration) {
        self.stale_time = stale_time;
    }

    pub(crate) fn begin_fetch(&mut self, generation: u64, fetch: SharedFetch) {
        self.generation = generation;
        self.in_flight = Some(InFlight { generation, fetch });
        self.status = QueryStatus::Loading;
        self.error = None;
    }

    /// Applies a fetch result. Error results keep the previous data.
    pub(crate) fn resolve(&mut self, result: &Result<Payload, QueryError>, now: Instant) {
        self.in_flight = None;
        match result {
            Ok(payload) => {
                self.data = Some(Arc::clone(payload));
                self.status = QueryStatus::Success;
                self.error = None;
                self.fetched_at = Some(now);
            }
            Err(error) => {
                self.status = QueryStatus::Error;
                self.error = Some(error.clone());
            }
        }
    }

    /// Marks this entry as stale and drops any outstanding fetch.
    ///
    /// Data is kept for display. An entry that was loading falls back to
    /// `Success` (stale) when it has data and to `Idle` otherwise.
    pub(crate) fn invalidate(&mut self) {
        self.fetched_at = None;
        if self.in_flight.take().is_some() {
            self.generation += 1;
            self.error = None;
            self.status = if self.data.is_some() {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            };
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("has_data", &self.data.is_some())
            .field("status", &self.status)
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("stale_time", &self.stale_time)
            .field("generation", &self.generation)
            .field("version", &self.version)
            .field("in_flight", &self.in_flight.as_ref().map(|f| f.generation))
            .finish()
    }
}
