//! # storefront-query - client-side data synchronization for a storefront
//!
//! storefront-query keeps an in-memory cache of server resources (current
//! user, product catalog, shopping cart) consistent with a remote HTTP API,
//! in the style of SWR or TanStack Query. Every reader of a resource sees the
//! same eventually consistent view without redundant traffic.
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! 1. **Transport**: sends HTTP-shaped requests and returns JSON or a typed error
//! 2. **CacheStore**: the single owner and writer of cached state, keyed by [`CacheKey`]
//! 3. **QueryEngine**: answers reads from fresh cache, joins in-flight fetches, or starts one
//! 4. **MutationEngine**: runs writes and, only after success, invalidates and seeds the cache
//! 5. **Observers**: streams that re-yield whenever their key changes
//!
//! ## Core Components
//!
//! - [`QueryClient`]: owns one cache, both engines and per-key-family configuration
//! - [`Mutation`]: a write plus the key prefixes it invalidates
//! - [`QueryObserver`](subscription::QueryObserver): a stream of results for one key
//! - [`Storefront`](storefront::Storefront): typed catalog, cart and session operations
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_query::{cache_key, Mutation, QueryClient};
//!
//! # async fn demo() {
//! let client = Arc::new(QueryClient::new());
//!
//! let cart = client
//!     .query(&cache_key!["cart"], || async { Ok(vec!["kettle".to_string()]) })
//!     .await;
//! assert_eq!(cart.data().map(Vec::len), Some(1));
//!
//! let add = Mutation::new("add cart item", |name: String| async move { Ok(name) })
//!     .invalidates(cache_key!["cart"]);
//! client.mutate(&add, "teapot".to_string()).await;
//!
//! // The cart is stale now; the next read refetches it.
//! assert!(client.snapshot::<Vec<String>>(&cache_key!["cart"]).is_stale());
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod mutation;
pub mod prelude;
pub mod query;
pub mod retry;
pub mod storefront;
pub mod subscription;
pub mod transport;

pub use cache::{CacheEntry, CacheEvent, CacheEventKind, CacheStore, QueryStatus, Unsubscribe};
pub use client::QueryClient;
pub use config::{QueryConfig, QueryDefaults};
pub use error::{QueryError, Result};
pub use key::{CacheKey, KeySegment};
pub use mutation::{Mutation, MutationEngine, MutationResult, MutationState, Seed};
pub use query::{QueryEngine, QueryResult, QueryState};
pub use retry::RetryPolicy;
