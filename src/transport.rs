//! The boundary to the storefront's HTTP API.
//!
//! Everything above this module talks to the server through the
//! [`Transport`] trait, so tests and alternative clients can swap the
//! implementation. [`HttpTransport`] is the `reqwest` implementation.

mod config;
mod http;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{QueryError, Result};

pub use config::TransportConfig;
pub use http::HttpTransport;

/// Re-export so callers can build requests without depending on `reqwest`.
pub use reqwest::Method;

/// An HTTP-shaped request relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, e.g. `/catalog/products/7`.
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Decode`] if `body` cannot be represented as JSON.
    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| QueryError::Decode(e.to_string()))?;
        Ok(self.with_body(value))
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }
}

/// Sends requests to the API.
///
/// Implementations resolve to the JSON success body (`null` when the body is
/// empty), [`QueryError::Server`] for non-2xx responses and
/// [`QueryError::Network`] when the server could not be reached.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<Value>;
}

/// Sends `request` and decodes the success body into `T`.
///
/// # Errors
///
/// Returns the transport's error, or [`QueryError::Decode`] when the body does
/// not have the expected shape.
pub async fn fetch_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<T> {
    let path = request.path.clone();
    let value = transport.request(request).await?;
    serde_json::from_value(value).map_err(|e| QueryError::Decode(format!("{path}: {e}")))
}
