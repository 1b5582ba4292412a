use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::QueryError;
use crate::key::CacheKey;

use super::entry::{CacheEntry, Payload, SharedFetch};

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// The entry was replaced or changed status.
    Updated,
    /// The entry was marked stale.
    Invalidated,
}

/// Change notification delivered to subscribers of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
    /// Entry version after the change.
    pub version: u64,
}

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    entries: DashMap<CacheKey, CacheEntry>,
    subscribers: DashMap<CacheKey, Vec<Subscriber>>,
    next_subscriber: AtomicU64,
}

/// Outcome of asking the store for a key on behalf of a query.
pub(crate) enum Lookup {
    /// Cached data is fresh; no fetch needed.
    Fresh(CacheEntry),
    /// Another caller's fetch is already in flight.
    Joined(SharedFetch),
    /// A new fetch was started by this call.
    Started(SharedFetch),
}

/// In-memory map from [`CacheKey`] to [`CacheEntry`].
///
/// This is the only place cache state is written. Cloning is cheap and every
/// clone refers to the same entries and subscribers. Each change to a key is
/// applied under that key's lock; subscriber callbacks run after the lock is
/// released, so they may read the store.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the entry for `key`, without side effects.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.entries.get(key).map(|entry| entry.clone())
    }

    /// Replaces the entry for `key` and notifies that key's subscribers.
    ///
    /// Any fetch in flight for the key is superseded: its completion will be
    /// discarded.
    pub fn put(&self, key: CacheKey, mut entry: CacheEntry) {
        let version = {
            let mut slot = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(entry.stale_time()));
            entry.generation = slot.generation + 1;
            entry.version = slot.version + 1;
            entry.in_flight = None;
            entry.last_accessed = Instant::now();
            *slot = entry;
            slot.version
        };
        debug!(key = %key, version, "cache put");
        self.notify(&CacheEvent {
            key,
            kind: CacheEventKind::Updated,
            version,
        });
    }

    /// Marks every entry under `prefix` as stale, keeping cached data.
    ///
    /// Returns the number of entries touched.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.invalidate_except(prefix, &[])
    }

    /// Like [`invalidate`](Self::invalidate), leaving the keys in `keep`
    /// untouched.
    pub(crate) fn invalidate_except(&self, prefix: &CacheKey, keep: &[CacheKey]) -> usize {
        let mut events = Vec::new();
        for mut slot in self.inner.entries.iter_mut() {
            if !slot.key().starts_with(prefix) || keep.contains(slot.key()) {
                continue;
            }
            slot.invalidate();
            slot.version += 1;
            events.push(CacheEvent {
                key: slot.key().clone(),
                kind: CacheEventKind::Invalidated,
                version: slot.version,
            });
        }
        debug!(prefix = %prefix, count = events.len(), "cache invalidate");
        for event in &events {
            self.notify(event);
        }
        events.len()
    }

    /// Registers `callback` for changes to exactly `key`.
    ///
    /// The subscription lasts until the returned guard is dropped or
    /// [`Unsubscribe::unsubscribe`] is called.
    pub fn subscribe<F>(&self, key: &CacheKey, callback: F) -> Unsubscribe
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        trace!(key = %key, id, "subscribed");
        Unsubscribe {
            store: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
            active: true,
        }
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner.subscribers.get(key).map_or(0, |subs| subs.len())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Removes entries not read for longer than `cache_time` that have no
    /// subscribers and no fetch in flight. Returns the number removed.
    pub fn collect_garbage(&self, cache_time: Duration) -> usize {
        let now = Instant::now();
        let before = self.inner.entries.len();
        self.inner.entries.retain(|key, entry| {
            !entry.should_gc(now, cache_time) || self.inner.subscribers.contains_key(key)
        });
        let removed = before.saturating_sub(self.inner.entries.len());
        if removed > 0 {
            debug!(removed, "collected idle cache entries");
        }
        removed
    }

    /// Returns a copy of the entry and records the read for garbage collection.
    pub(crate) fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.entries.get_mut(key).map(|mut entry| {
            entry.last_accessed = Instant::now();
            entry.clone()
        })
    }

    /// Serves fresh data, joins the in-flight fetch, or starts a new one.
    ///
    /// `start` receives the generation assigned to the new fetch. The check
    /// and the registration happen under the key's lock, so at most one fetch
    /// per key is ever outstanding. With `force`, freshness and any in-flight
    /// fetch are ignored and the new fetch supersedes the old one.
    pub(crate) fn begin_or_join<F>(
        &self,
        key: &CacheKey,
        stale_time: Duration,
        force: bool,
        start: F,
    ) -> Lookup
    where
        F: FnOnce(u64) -> SharedFetch,
    {
        let now = Instant::now();
        let (fetch, version) = {
            let mut slot = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(stale_time));
            slot.last_accessed = now;
            slot.set_stale_time(stale_time);

            if !force {
                if slot.is_fresh(now) {
                    return Lookup::Fresh(slot.clone());
                }
                if let Some(in_flight) = &slot.in_flight {
                    debug!(key = %key, generation = in_flight.generation, "joining in-flight fetch");
                    return Lookup::Joined(in_flight.fetch.clone());
                }
            }

            let generation = slot.generation + 1;
            let fetch = start(generation);
            slot.begin_fetch(generation, fetch.clone());
            slot.version += 1;
            debug!(key = %key, generation, "fetch started");
            (fetch, slot.version)
        };
        self.notify(&CacheEvent {
            key: key.clone(),
            kind: CacheEventKind::Updated,
            version,
        });
        Lookup::Started(fetch)
    }

    /// Applies a fetch result if `generation` is still the in-flight one.
    ///
    /// Returns `false` when the completion was superseded and discarded.
    pub(crate) fn complete_fetch(
        &self,
        key: &CacheKey,
        generation: u64,
        result: &Result<Payload, QueryError>,
    ) -> bool {
        let version = {
            let Some(mut slot) = self.inner.entries.get_mut(key) else {
                debug!(key = %key, generation, "discarding completion for removed entry");
                return false;
            };
            let current = slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation);
            if !current {
                warn!(
                    key = %key,
                    generation,
                    latest = slot.generation,
                    "discarding superseded completion"
                );
                return false;
            }
            slot.resolve(result, Instant::now());
            slot.version += 1;
            slot.version
        };
        debug!(key = %key, generation, ok = result.is_ok(), "fetch completed");
        self.notify(&CacheEvent {
            key: key.clone(),
            kind: CacheEventKind::Updated,
            version,
        });
        true
    }

    fn notify(&self, event: &CacheEvent) {
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .get(&event.key)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.inner.entries.len())
            .field("subscribed_keys", &self.inner.subscribers.len())
            .finish()
    }
}

/// Guard returned by [`CacheStore::subscribe`].
#[must_use = "dropping the guard ends the subscription"]
#[derive(Debug)]
pub struct Unsubscribe {
    store: Weak<Inner>,
    key: CacheKey,
    id: u64,
    active: bool,
}

impl Unsubscribe {
    /// Ends the subscription.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        if let Some(mut subs) = inner.subscribers.get_mut(&self.key) {
            subs.retain(|s| s.id != self.id);
        }
        inner.subscribers.remove_if(&self.key, |_, subs| subs.is_empty());
        trace!(key = %self.key, id = self.id, "unsubscribed");
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.remove();
    }
}
