//! JSON-over-HTTP implementation of the remote gateway.
//!
//! ### Endpoints (relative to the configured base URL)
//!
//! - `GET    prayers`                 list the global feed
//! - `GET    users/{id}/prayers`      list one author's prayers
//! - `POST   prayers`                 create
//! - `PATCH  prayers/{id}`            update content
//! - `DELETE prayers/{id}`            delete
//! - `PUT | DELETE prayers/{id}/like` like / unlike
//! - `GET    users/{id}/avatar`       resolve `{large, medium, small}`
//!
//! ### Status classification
//!
//! - 401/403 → `Auth` (never retried)
//! - 404 → `NotFound`, 429 → `RateLimited`
//! - other 4xx → `Rejected` with the response body
//! - 5xx → `Http`

use prayerline_core::config::{AppConfig, ConfigError};
use prayerline_core::{AvatarUrls, GatewayError, NewPrayer, Prayer, PrayerGateway};
use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use url::Url;

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "prayerline/0.1";

/// Longest response body quoted in a `Rejected` error.
const MAX_ERROR_BODY: usize = 512;

/// REST gateway configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: Url,
    /// Bearer token; reads work without one if the service allows it.
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl RestConfig {
    /// Derive gateway settings from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `api_base_url` does not parse.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ConfigError::Invalid { field: "api_base_url".into(), reason: e.to_string() })?;

        Ok(Self {
            base_url,
            token: config.api_token.clone(),
            timeout: config.timeout(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }
}

#[derive(Serialize)]
struct ContentPatch<'a> {
    content: &'a str,
}

/// Gateway backed by a JSON REST service.
#[derive(Debug, Clone)]
pub struct RestGateway {
    http: reqwest::Client,
    config: RestConfig,
}

impl RestGateway {
    /// Create a new REST gateway with the given configuration.
    pub fn new(config: RestConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Resolve `segments` under the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Rejected(format!("base URL cannot have paths: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let start = Instant::now();
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        tracing::debug!(url = %response.url(), status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, "gateway response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Map a non-success status to a gateway error.
pub fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth(format!("status {}", status.as_u16())),
        StatusCode::NOT_FOUND => GatewayError::NotFound(truncate(body)),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
        s if s.is_client_error() => GatewayError::Rejected(truncate(body)),
        s => GatewayError::Http { status: s.as_u16() },
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() { GatewayError::Timeout } else { GatewayError::Network(err.to_string()) }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[async_trait::async_trait]
impl PrayerGateway for RestGateway {
    async fn create_prayer(&self, input: &NewPrayer) -> Result<Prayer, GatewayError> {
        let url = self.endpoint(&["prayers"])?;
        self.send_json(self.request(Method::POST, url).json(input)).await
    }

    async fn update_prayer(&self, id: &str, content: &str) -> Result<Prayer, GatewayError> {
        let url = self.endpoint(&["prayers", id])?;
        self.send_json(self.request(Method::PATCH, url).json(&ContentPatch { content }))
            .await
    }

    async fn delete_prayer(&self, id: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(&["prayers", id])?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn list_prayers(&self) -> Result<Vec<Prayer>, GatewayError> {
        let url = self.endpoint(&["prayers"])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn list_prayers_by_author(&self, author_id: &str) -> Result<Vec<Prayer>, GatewayError> {
        let url = self.endpoint(&["users", author_id, "prayers"])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn set_liked(&self, id: &str, liked: bool) -> Result<Prayer, GatewayError> {
        let url = self.endpoint(&["prayers", id, "like"])?;
        let method = if liked { Method::PUT } else { Method::DELETE };
        self.send_json(self.request(method, url)).await
    }

    async fn resolve_avatar_urls(&self, user_id: &str) -> Result<AvatarUrls, GatewayError> {
        let url = self.endpoint(&["users", user_id, "avatar"])?;
        self.send_json(self.request(Method::GET, url)).await
    }
}
