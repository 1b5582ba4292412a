//! Typed access to the storefront API on top of a [`QueryClient`].
//!
//! [`Storefront`] binds the key families, fetchers and mutation declarations
//! of the catalog, cart and session endpoints to one client:
//!
//! | Key family                              | Source                        |
//! |-----------------------------------------|-------------------------------|
//! | `["currentUser"]`                       | `GET /auth/me` (401 → `None`) |
//! | `["products", "list", page, size, sort]`| `GET /catalog/products`       |
//! | `["products", id]`                      | `GET /catalog/products/{id}`  |
//! | `["cart"]`                              | `GET /cart`                   |
//!
//! Login and logout invalidate and then seed `["currentUser"]`; every cart
//! mutation invalidates `["cart"]`.

pub mod auth;
pub mod cart;
pub mod catalog;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::QueryClient;
use crate::config::QueryConfig;
use crate::error::Result;
use crate::mutation::{Mutation, MutationResult};
use crate::query::QueryResult;
use crate::retry::RetryPolicy;
use crate::subscription::QueryObserver;
use crate::transport::{HttpTransport, Transport, TransportConfig};

pub use auth::{AuthResponse, AuthState, LoginInput, User};
pub use cart::{AddToCartInput, Cart, CartItem, UpdateCartItemInput};
pub use catalog::{Page, Product, ProductImage, ProductListParams};

/// Storefront configuration: where the API lives and how long each key
/// family stays fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorefrontConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    /// Freshness window of `["currentUser"]`
    #[serde(default = "default_current_user_stale_time")]
    pub current_user_stale_time: Duration,

    /// Freshness window of every `["products", ..]` key
    #[serde(default)]
    pub catalog_stale_time: Duration,

    /// Freshness window of `["cart"]`
    #[serde(default)]
    pub cart_stale_time: Duration,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            current_user_stale_time: default_current_user_stale_time(),
            catalog_stale_time: Duration::ZERO,
            cart_stale_time: Duration::ZERO,
        }
    }
}

impl StorefrontConfig {
    /// Defaults with the transport read from the environment.
    pub fn from_env() -> Self {
        Self {
            transport: TransportConfig::from_env(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_catalog_stale_time(mut self, stale_time: Duration) -> Self {
        self.catalog_stale_time = stale_time;
        self
    }

    #[must_use]
    pub const fn with_cart_stale_time(mut self, stale_time: Duration) -> Self {
        self.cart_stale_time = stale_time;
        self
    }
}

const fn default_current_user_stale_time() -> Duration {
    Duration::from_secs(5 * 60)
}

/// The storefront's data layer.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct Storefront {
    client: Arc<QueryClient>,
    transport: Arc<dyn Transport>,
    login: Mutation<LoginInput, AuthResponse>,
    logout: Mutation<(), ()>,
    add_item: Mutation<AddToCartInput, Cart>,
    update_item: Mutation<UpdateCartItemInput, Cart>,
    remove_item: Mutation<String, Cart>,
}

impl Storefront {
    /// Connects to the API described by `config.transport` over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Config`](crate::QueryError::Config) if the
    /// transport cannot be built.
    pub fn connect(config: &StorefrontConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.transport.clone())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Uses `transport` with a new, private [`QueryClient`].
    pub fn new(transport: Arc<dyn Transport>, config: &StorefrontConfig) -> Self {
        Self::with_client(Arc::new(QueryClient::new()), transport, config)
    }

    /// Uses `transport` and registers the storefront's key families on
    /// `client`.
    pub fn with_client(
        client: Arc<QueryClient>,
        transport: Arc<dyn Transport>,
        config: &StorefrontConfig,
    ) -> Self {
        let catalog = QueryConfig::default().with_stale_time(config.catalog_stale_time);
        client.set_query_defaults(
            auth::current_user_key(),
            QueryConfig::default()
                .with_stale_time(config.current_user_stale_time)
                .with_retry(RetryPolicy::none()),
        );
        client.set_query_defaults(catalog::products_key(), catalog.clone());
        // An empty id means "no product selected": never fetched.
        client.set_query_defaults(catalog::product_key(""), catalog.enabled(false));
        client.set_query_defaults(
            cart::cart_key(),
            QueryConfig::default().with_stale_time(config.cart_stale_time),
        );
        debug!(base_url = %config.transport.base_url, "storefront ready");

        Self {
            login: auth::login_mutation(Arc::clone(&transport)),
            logout: auth::logout_mutation(Arc::clone(&transport)),
            add_item: cart::add_item_mutation(Arc::clone(&transport)),
            update_item: cart::update_item_mutation(Arc::clone(&transport)),
            remove_item: cart::remove_item_mutation(Arc::clone(&transport)),
            client,
            transport,
        }
    }

    pub const fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    pub async fn current_user(&self) -> QueryResult<Option<User>> {
        let fetch = self.bind(auth::fetch_current_user);
        self.client.query(&auth::current_user_key(), fetch).await
    }

    pub async fn products(&self, params: &ProductListParams) -> QueryResult<Page<Product>> {
        let owned = params.clone();
        let fetch = self.bind(move |transport| catalog::fetch_products(transport, owned.clone()));
        self.client
            .query(&catalog::product_list_key(params), fetch)
            .await
    }

    /// Reads one product. An empty `id` is never fetched and stays `Idle`.
    pub async fn product(&self, id: &str) -> QueryResult<Product> {
        let owned = id.to_string();
        let fetch = self.bind(move |transport| catalog::fetch_product(transport, owned.clone()));
        self.client.query(&catalog::product_key(id), fetch).await
    }

    pub async fn cart(&self) -> QueryResult<Cart> {
        let fetch = self.bind(cart::fetch_cart);
        self.client.query(&cart::cart_key(), fetch).await
    }

    pub async fn login(&self, input: LoginInput) -> MutationResult<AuthResponse> {
        self.client.mutate(&self.login, input).await
    }

    pub async fn logout(&self) -> MutationResult<()> {
        self.client.mutate(&self.logout, ()).await
    }

    pub async fn add_to_cart(&self, input: AddToCartInput) -> MutationResult<Cart> {
        self.client.mutate(&self.add_item, input).await
    }

    pub async fn update_cart_item(&self, input: UpdateCartItemInput) -> MutationResult<Cart> {
        self.client.mutate(&self.update_item, input).await
    }

    pub async fn remove_from_cart(&self, item_id: impl Into<String>) -> MutationResult<Cart> {
        self.client.mutate(&self.remove_item, item_id.into()).await
    }

    /// Authentication status from the cached current user, without fetching.
    pub fn auth_state(&self) -> AuthState {
        AuthState::from(&self.client.snapshot::<Option<User>>(&auth::current_user_key()))
    }

    pub fn watch_current_user(&self) -> QueryObserver<Option<User>> {
        let fetch = self.bind(auth::fetch_current_user);
        QueryObserver::new(auth::current_user_key(), fetch, Arc::clone(&self.client))
    }

    pub fn watch_products(&self, params: &ProductListParams) -> QueryObserver<Page<Product>> {
        let owned = params.clone();
        let fetch = self.bind(move |transport| catalog::fetch_products(transport, owned.clone()));
        QueryObserver::new(
            catalog::product_list_key(params),
            fetch,
            Arc::clone(&self.client),
        )
    }

    pub fn watch_product(&self, id: &str) -> QueryObserver<Product> {
        let owned = id.to_string();
        let fetch = self.bind(move |transport| catalog::fetch_product(transport, owned.clone()));
        QueryObserver::new(catalog::product_key(id), fetch, Arc::clone(&self.client))
    }

    pub fn watch_cart(&self) -> QueryObserver<Cart> {
        let fetch = self.bind(cart::fetch_cart);
        QueryObserver::new(cart::cart_key(), fetch, Arc::clone(&self.client))
    }

    /// Turns a transport-taking fetch into a fetch function for the client.
    fn bind<F, Fut>(&self, fetch: F) -> impl Fn() -> Fut + Send + Sync + use<F, Fut>
    where
        F: Fn(Arc<dyn Transport>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        move || fetch(Arc::clone(&transport))
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
