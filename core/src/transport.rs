//! Transport adapter: the only component that talks to the Alma API.
//!
//! # Design
//! `AlmaApi` is split the same way as the rest of the core: `build_get`
//! turns a resource path into an `HttpRequest` (base URL, API key header,
//! `format=json`), `parse_get` turns an `HttpResponse` into JSON or an
//! `AlmaError::Request`. The round-trip in between belongs to an
//! `HttpExecutor`; `ReqwestExecutor` is the production one.
//!
//! The resource framework only sees the `Transport` trait, which makes it
//! trivial to stub in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AlmaError, Result};
use crate::http::{HttpRequest, HttpResponse};

/// Host shared by every Alma region.
pub const ALMA_HOST: &str = "hosted.exlibrisgroup.com";

/// Path prefix of the v1 REST API.
pub const API_ROOT: &str = "/almaws/v1";

/// Base URL of the Alma API in `region` (`eu`, `na`, `ap`, ...).
pub fn region_base_url(region: &str) -> String {
    format!("https://api-{region}.{ALMA_HOST}{API_ROOT}")
}

/// Anything that can GET a path relative to the API root and return the
/// decoded JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value>;
}

/// Performs one HTTP round-trip.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// `HttpExecutor` backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AlmaError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AlmaError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AlmaError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Authenticated client for one Alma API endpoint.
#[derive(Clone)]
pub struct AlmaApi {
    base_url: String,
    api_key: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    executor: Arc<dyn HttpExecutor>,
}

impl AlmaApi {
    pub fn new(region: &str, api_key: &str, executor: Arc<dyn HttpExecutor>) -> Self {
        Self {
            base_url: region_base_url(region),
            api_key: api_key.to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            executor,
        }
    }

    /// Point the adapter somewhere other than the regional Alma host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Send an extra header on every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Send an extra query parameter on every request.
    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_get(&self, path: &str) -> HttpRequest {
        let separator = if path.starts_with('/') || path.is_empty() { "" } else { "/" };

        let mut headers = vec![
            ("Authorization".to_string(), format!("apikey {}", self.api_key)),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        headers.extend(self.headers.iter().cloned());

        let mut query = vec![("format".to_string(), "json".to_string())];
        query.extend(self.query.iter().cloned());

        HttpRequest {
            url: format!("{}{separator}{path}", self.base_url),
            headers,
            query,
        }
    }

    pub fn parse_get(&self, response: HttpResponse) -> Result<Value> {
        if !response.is_success() {
            return Err(AlmaError::Request {
                status: response.status,
                message: error_message(&response.body),
            });
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&response.body).map_err(|e| AlmaError::Deserialization(e.to_string()))
    }
}

impl fmt::Debug for AlmaApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlmaApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("headers", &self.headers)
            .field("query", &self.query)
            .finish()
    }
}

#[async_trait]
impl Transport for AlmaApi {
    async fn get(&self, path: &str) -> Result<Value> {
        let request = self.build_get(path);
        debug!(url = %request.url, "GET");
        let response = self.executor.execute(request).await?;
        if !response.is_success() {
            warn!(path, status = response.status, "Alma request failed");
        }
        self.parse_get(response)
    }
}

/// Pull the first `errorMessage` out of an Alma error body, falling back to
/// the raw body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let alma_message = parsed.as_ref().and_then(|v| {
        let errors = &v["errorList"]["error"];
        let first = errors.as_array().and_then(|list| list.first()).unwrap_or(errors);
        first["errorMessage"].as_str().map(str::to_string)
    });
    match alma_message {
        Some(message) => message,
        None if body.trim().is_empty() => "empty response body".to_string(),
        None => body.to_string(),
    }
}
