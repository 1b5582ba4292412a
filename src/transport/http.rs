//! `reqwest` implementation of [`Transport`].

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{ApiRequest, Transport, TransportConfig};
use crate::error::{QueryError, Result};

/// Production HTTP transport.
///
/// Keeps a cookie store so the session cookie set by login rides on every
/// later request, and sends `Content-Type: application/json` throughout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: reqwest::Client,
    base_url: String,
    config: TransportConfig,
}

impl HttpTransport {
    /// Builds a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Config`] if the base URL is not an absolute URL
    /// or the client cannot be built.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| QueryError::Config(format!("invalid base URL {:?}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(QueryError::Config(format!(
                "base URL {:?} cannot carry a path",
                config.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| QueryError::Config(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Create HTTP transport with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(TransportConfig::default())
    }

    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<Value> {
        let url = self.url(&request.path);
        debug!(
            method = %request.method,
            %url,
            body = ?request.body.as_ref().map(redacted),
            "API request"
        );

        let mut builder = self.inner.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        let text = response.text().await.map_err(network_error)?;

        if status.is_success() {
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| QueryError::Decode(format!("{}: {e}", request.path)))?
            };
            debug!(%url, status = status.as_u16(), body = ?redacted(&body), "API response");
            return Ok(body);
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        if status == StatusCode::UNAUTHORIZED {
            warn!(%url, "API request unauthorized");
        } else {
            debug!(%url, status = status.as_u16(), ?body, "API error");
        }
        Err(QueryError::Server {
            status: status.as_u16(),
            body,
        })
    }
}

/// Object fields never written to logs.
const SECRET_FIELDS: [&str; 2] = ["password", "token"];

/// Copy of `value` with every secret field replaced, at any depth.
fn redacted(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| {
                    let field = if SECRET_FIELDS.contains(&name.as_str()) {
                        Value::String("<redacted>".to_string())
                    } else {
                        redacted(field)
                    };
                    (name.clone(), field)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redacted).collect()),
        other => other.clone(),
    }
}

fn network_error(e: reqwest::Error) -> QueryError {
    if e.is_timeout() {
        QueryError::Network(format!("request timed out: {e}"))
    } else {
        QueryError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_redacted_hides_credentials() {
        let login = json!({ "email": "ada@example.com", "password": "analytical" });
        assert_eq!(
            redacted(&login),
            json!({ "email": "ada@example.com", "password": "<redacted>" })
        );

        let response = json!({
            "token": "jwt",
            "type": "Bearer",
            "user": { "id": 1, "roles": ["CUSTOMER"] },
            "sessions": [{ "token": "old" }]
        });
        assert_eq!(
            redacted(&response),
            json!({
                "token": "<redacted>",
                "type": "Bearer",
                "user": { "id": 1, "roles": ["CUSTOMER"] },
                "sessions": [{ "token": "<redacted>" }]
            })
        );
    }

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(TransportConfig::new(format!("{}/api/", server.uri()))).unwrap()
    }

    #[test]
    fn test_transport_with_defaults() {
        let transport = HttpTransport::with_defaults().unwrap();
        assert_eq!(transport.config().base_url, "http://localhost:8080/api");
        assert_eq!(transport.url("/cart"), "http://localhost:8080/api/cart");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpTransport::new(TransportConfig::new("not a url"));
        assert!(matches!(result, Err(QueryError::Config(_))));

        let result = HttpTransport::new(TransportConfig::new("mailto:shop@example.com"));
        assert!(matches!(result, Err(QueryError::Config(_))));
    }

    #[tokio::test]
    async fn test_get_with_query_and_json_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/catalog/products"))
            .and(query_param("page", "0"))
            .and(query_param("size", "20"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let request = ApiRequest::get("/catalog/products")
            .with_query("page", 0)
            .with_query("size", 20);
        let body = transport.request(request).await.unwrap();
        assert_eq!(body, json!({ "content": [] }));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cart/items"))
            .and(body_json(json!({ "productId": "7", "quantity": 2 })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "total": 20.0 })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let request =
            ApiRequest::post("/cart/items").with_body(json!({ "productId": "7", "quantity": 2 }));
        assert_eq!(transport.request(request).await.unwrap(), json!({ "total": 20.0 }));
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let body = transport.request(ApiRequest::post("/auth/logout")).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "no session" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cart"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let error = transport.request(ApiRequest::get("/auth/me")).await.unwrap_err();
        assert!(error.is_unauthorized());
        assert_eq!(
            error,
            QueryError::Server {
                status: 401,
                body: json!({ "message": "no session" })
            }
        );

        let error = transport.request(ApiRequest::get("/cart")).await.unwrap_err();
        assert_eq!(
            error,
            QueryError::Server {
                status: 500,
                body: Value::String("boom".into())
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/cart"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let error = transport.request(ApiRequest::get("/cart")).await.unwrap_err();
        assert!(matches!(error, QueryError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // Nothing listens on port 1.
        let config = TransportConfig::new("http://127.0.0.1:1/api").with_timeout(Duration::from_secs(2));
        let transport = HttpTransport::new(config).unwrap();
        let error = transport.request(ApiRequest::get("/cart")).await.unwrap_err();
        assert!(matches!(error, QueryError::Network(_)));
    }

    #[tokio::test]
    async fn test_session_cookie_is_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=abc; Path=/")
                    .set_body_json(json!({})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cart"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.request(ApiRequest::post("/auth/login")).await.unwrap();
        let cart = transport.request(ApiRequest::get("/cart")).await.unwrap();
        assert_eq!(cart, json!({ "items": [] }));
    }
}
