//! The in-memory cache: entries, the store that owns them, and change
//! notifications.

mod entry;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use store::{CacheEvent, CacheEventKind, CacheStore, Unsubscribe};

pub(crate) use entry::{Payload, SharedFetch};
pub(crate) use store::Lookup;
