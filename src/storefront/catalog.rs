//! Product catalog: paginated listings and single products.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache_key;
use crate::error::Result;
use crate::key::CacheKey;
use crate::transport::{ApiRequest, Transport, fetch_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl Product {
    /// The image flagged as primary, else the first by display order.
    pub fn primary_image(&self) -> Option<&ProductImage> {
        self.images
            .iter()
            .find(|image| image.is_primary)
            .or_else(|| self.images.iter().min_by_key(|image| image.display_order))
    }

    pub const fn in_stock(&self) -> bool {
        self.stock_quantity > 0
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
    #[serde(default)]
    pub empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductListParams {
    pub page: u32,
    pub size: u32,
    pub sort: Option<String>,
}

impl Default for ProductListParams {
    fn default() -> Self {
        Self {
            page: 0,
            size: 20,
            sort: None,
        }
    }
}

impl ProductListParams {
    #[must_use]
    pub const fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub const fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

/// Prefix shared by every catalog key.
pub fn products_key() -> CacheKey {
    cache_key!["products"]
}

pub fn product_list_key(params: &ProductListParams) -> CacheKey {
    products_key()
        .child("list")
        .child(params.page)
        .child(params.size)
        .child(params.sort.clone())
}

pub fn product_key(id: &str) -> CacheKey {
    products_key().child(id)
}

/// `GET /catalog/products?page&size&sort`
pub async fn fetch_products(
    transport: Arc<dyn Transport>,
    params: ProductListParams,
) -> Result<Page<Product>> {
    let mut request = ApiRequest::get("/catalog/products")
        .with_query("page", params.page)
        .with_query("size", params.size);
    if let Some(sort) = &params.sort {
        request = request.with_query("sort", sort);
    }
    fetch_json(transport.as_ref(), request).await
}

/// `GET /catalog/products/{id}`
pub async fn fetch_product(transport: Arc<dyn Transport>, id: String) -> Result<Product> {
    let path = format!("/catalog/products/{}", urlencoding::encode(&id));
    fetch_json(transport.as_ref(), ApiRequest::get(path)).await
}
