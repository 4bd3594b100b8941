use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::negotiator::Negotiator;
use crate::types::{BatchRequest, BatchResponse, MEDIA_TYPE};

const BATCH_PATH: &str = "objects/batch";

/// Timeouts for HTTP calls made by the transfer engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpConfig {
    /// Build a `reqwest` client with these timeouts applied.
    pub fn build_client(&self) -> ApiResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()?;
        Ok(client)
    }
}

/// [`Negotiator`] that POSTs to `<endpoint>/objects/batch`.
#[derive(Clone, Debug)]
pub struct BatchClient {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl BatchClient {
    /// Create a client for the LFS endpoint `endpoint`
    /// (e.g. `https://host/repo.git/info/lfs`).
    pub fn new(endpoint: &str, config: &HttpConfig) -> ApiResult<Self> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ApiError::InvalidEndpoint(endpoint.to_string()));
        }
        let url = format!("{}/{BATCH_PATH}", endpoint.trim_end_matches('/'));
        Ok(Self {
            http: config.build_client()?,
            url,
            headers: HeaderMap::new(),
        })
    }

    /// Add a header sent with every batch call, such as `Authorization`.
    pub fn with_header(mut self, name: &str, value: &str) -> ApiResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::InvalidHeader(format!("value for {name}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Negotiator for BatchClient {
    async fn negotiate(&self, request: &BatchRequest) -> ApiResult<BatchResponse> {
        if request.objects.is_empty() {
            return Ok(BatchResponse::default());
        }
        debug!(
            operation = %request.operation,
            objects = request.objects.len(),
            "api: batch"
        );

        let body = serde_json::to_vec(request)?;
        let resp = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, MEDIA_TYPE)
            .header(CONTENT_TYPE, MEDIA_TYPE)
            .body(body)
            .send()
            .await
            .inspect_err(|e| warn!(error = %e, "api: batch request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let mut parsed: BatchResponse = serde_json::from_slice(&bytes)?;
        parsed.resolve_expiry(Utc::now());
        debug!(
            transfer = parsed.adapter_name(),
            objects = parsed.objects.len(),
            "api: batch response"
        );
        Ok(parsed)
    }
}
