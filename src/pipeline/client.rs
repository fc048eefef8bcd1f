//! HTTP client for the fare search API

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use super::Fetcher;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::TaskParameters;

/// Longest response body kept in an [`Error::Http`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// POSTs search parameters to the configured endpoint
#[derive(Clone, Debug)]
pub struct ApiClient {
    http_client: reqwest::Client,
    url: Url,
}

impl ApiClient {
    /// Build a client from the `api` section of the configuration
    ///
    /// # Errors
    /// Returns a configuration error if the endpoint URL or a header is
    /// invalid, and a network error if the HTTP client cannot be created.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let url = search_url(&config.base_url, &config.search_endpoint)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config("api.headers", format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::config("api.headers", format!("invalid value for header '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { http_client, url })
    }

    /// Full URL of the search endpoint
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Fetcher for ApiClient {
    async fn fetch(&self, params: &TaskParameters) -> Result<Value> {
        tracing::debug!(url = %self.url, "Sending search request");

        let response = self
            .http_client
            .post(self.url.clone())
            .json(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!(status = status.as_u16(), url = %self.url, "Search request rejected");
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let document = serde_json::from_slice(&bytes)?;
        tracing::debug!(url = %self.url, bytes = bytes.len(), "Search response received");
        Ok(document)
    }
}

/// `base_url` with `endpoint` appended verbatim, so a base path is kept
fn search_url(base_url: &str, endpoint: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| Error::config("api.search_endpoint", format!("invalid URL '{joined}': {e}")))
}
