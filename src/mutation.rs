//! Mutations: remote writes that invalidate and seed the cache on success.
//!
//! A [`Mutation`] declares, up front, the key prefixes whose server-side truth
//! it can change. [`MutationEngine::mutate`] runs the write once and, only
//! after it is confirmed successful:
//!
//! 1. invalidates every declared prefix, so the next read of any key below
//!    it refetches
//! 2. writes any optimistic seeds computed from the response, so a value the
//!    mutation already returned does not have to be fetched again
//!
//! A key that is seeded is replaced rather than invalidated, so its
//! observers see the new value directly.
//!
//! A failed mutation writes nothing to the cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use storefront_query::{cache_key, Mutation, QueryClient};
//!
//! # async fn demo(client: QueryClient) {
//! let add_item = Mutation::new("add_item", |quantity: u32| async move {
//!     // POST to the remote API here
//!     Ok(quantity)
//! })
//! .invalidates(cache_key!["cart"]);
//!
//! let result = client.mutate(&add_item, 1).await;
//! assert!(result.is_success());
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::QueryDefaults;
use crate::error::{QueryError, Result};
use crate::key::CacheKey;

/// The state of a mutation result.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(QueryError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }

    /// Converts into the response or the error.
    ///
    /// # Errors
    ///
    /// Returns the mutation error, or [`QueryError::Aborted`] if the mutation
    /// never resolved.
    pub fn into_result(self) -> Result<T> {
        match self.state {
            MutationState::Success(data) => Ok(data),
            MutationState::Error(error) => Err(error),
            MutationState::Idle | MutationState::Loading => {
                Err(QueryError::Aborted("mutation has not resolved".to_string()))
            }
        }
    }
}

/// An optimistic cache write derived from a mutation response.
pub struct Seed {
    key: CacheKey,
    make: Box<dyn FnOnce(Duration) -> CacheEntry + Send>,
}

impl Seed {
    /// Seeds `key` with `data` as a freshly fetched value.
    pub fn new<T: Send + Sync + 'static>(key: CacheKey, data: T) -> Self {
        Self {
            key,
            make: Box::new(move |stale_time| CacheEntry::success(data, stale_time)),
        }
    }

    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seed").field("key", &self.key).finish_non_exhaustive()
    }
}

type Mutator<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O>> + Send + Sync>;
type Seeder<O> = Arc<dyn Fn(&O) -> Vec<Seed> + Send + Sync>;

/// A declared write operation.
///
/// `I` is the caller-supplied payload and `O` the decoded response.
pub struct Mutation<I, O> {
    name: &'static str,
    mutator: Mutator<I, O>,
    invalidates: Vec<CacheKey>,
    seeder: Option<Seeder<O>>,
}

impl<I, O> Mutation<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a mutation with no cache effects.
    pub fn new<F, Fut>(name: &'static str, mutator: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self {
            name,
            mutator: Arc::new(move |input| mutator(input).boxed()),
            invalidates: Vec::new(),
            seeder: None,
        }
    }

    /// Declares a key prefix this mutation can change.
    #[must_use]
    pub fn invalidates(mut self, prefix: CacheKey) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// Declares optimistic writes computed from a successful response.
    #[must_use]
    pub fn seeds<F>(mut self, seeder: F) -> Self
    where
        F: Fn(&O) -> Vec<Seed> + Send + Sync + 'static,
    {
        self.seeder = Some(Arc::new(seeder));
        self
    }
}

impl<I, O> Mutation<I, O> {
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The key prefixes invalidated on success.
    pub fn invalidation_set(&self) -> &[CacheKey] {
        &self.invalidates
    }
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            mutator: Arc::clone(&self.mutator),
            invalidates: self.invalidates.clone(),
            seeder: self.seeder.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("invalidates", &self.invalidates)
            .field("seeds", &self.seeder.is_some())
            .finish()
    }
}

/// Executes mutations and applies their cache effects.
#[derive(Debug, Clone)]
pub struct MutationEngine {
    store: CacheStore,
    defaults: Arc<RwLock<QueryDefaults>>,
}

impl MutationEngine {
    #[must_use]
    pub const fn new(store: CacheStore, defaults: Arc<RwLock<QueryDefaults>>) -> Self {
        Self { store, defaults }
    }

    /// Runs `mutation` once with `input`.
    ///
    /// Cache effects are applied exactly once, after the write succeeds. A
    /// failure is returned as [`MutationState::Error`] and leaves the cache
    /// untouched. Mutations are never retried.
    pub async fn mutate<I, O>(&self, mutation: &Mutation<I, O>, input: I) -> MutationResult<O> {
        debug!(mutation = mutation.name, "mutation started");
        match (mutation.mutator)(input).await {
            Ok(output) => {
                self.apply_effects(mutation, &output);
                info!(mutation = mutation.name, "mutation succeeded");
                MutationResult {
                    state: MutationState::Success(output),
                }
            }
            Err(error) => {
                warn!(mutation = mutation.name, %error, "mutation failed");
                MutationResult {
                    state: MutationState::Error(error),
                }
            }
        }
    }

    fn apply_effects<I, O>(&self, mutation: &Mutation<I, O>, output: &O) {
        let seeds = mutation
            .seeder
            .as_ref()
            .map(|seeder| seeder(output))
            .unwrap_or_default();

        // Seeded keys are replaced below; invalidating them first would make
        // observers refetch a value the response already carries.
        let seeded: Vec<CacheKey> = seeds.iter().map(|seed| seed.key.clone()).collect();
        for prefix in &mutation.invalidates {
            self.store.invalidate_except(prefix, &seeded);
        }

        for seed in seeds {
            let stale_time = self
                .defaults
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&seed.key)
                .stale_time;
            debug!(mutation = mutation.name, key = %seed.key, "optimistic write");
            self.store.put(seed.key, (seed.make)(stale_time));
        }
    }
}
