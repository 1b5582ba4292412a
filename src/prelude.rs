//! Prelude module for convenient imports.
//!
//! ```
//! use storefront_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - The cache and its engines
//! - [`QueryResult`] and [`QueryState`] - What a read yields
//! - [`Mutation`] and [`MutationResult`] - Writes and their outcome
//! - [`Subscription`] and [`QueryObserver`] - Streams of results
//! - [`Storefront`] - Typed storefront operations

pub use crate::cache_key;
pub use crate::client::QueryClient;
pub use crate::config::QueryConfig;
pub use crate::error::{QueryError, Result};
pub use crate::key::CacheKey;
pub use crate::mutation::{Mutation, MutationResult};
pub use crate::query::{QueryResult, QueryState};
pub use crate::storefront::{Storefront, StorefrontConfig};
pub use crate::subscription::{QueryObserver, Subscription};
