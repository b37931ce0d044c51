// Remote search API: error taxonomy, client configuration and the HTTP client

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::types::{
    ApiErrorPayload, CountriesMap, GeoResponseMap, HotelsMap, PriceMap, SearchPricesResponse,
    SearchToken, StartSearchResponse,
};

/// Status the server uses for "results not ready yet".
pub const TOO_EARLY: u16 = 425;

// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {status}")]
    Http { status: u16, payload: ApiErrorPayload },

    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn http(status: u16, payload: ApiErrorPayload) -> Self {
        ApiError::Http { status, payload }
    }

    pub fn is_too_early(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if *status == TOO_EARLY)
    }

    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Http { payload, .. } => payload.message.as_deref(),
            ApiError::Network(_) | ApiError::Cancelled => None,
        }
    }

    pub fn retry_after(&self) -> Option<&str> {
        match self {
            ApiError::Http { payload, .. } => payload.wait_until.as_deref(),
            ApiError::Network(_) | ApiError::Cancelled => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    // honour HTTP(S)_PROXY from the environment
    pub system_proxy: bool,
    pub retry: RetryConfig,
    pub messages: FallbackMessages,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 10_000,
            system_proxy: true,
            retry: RetryConfig::default(),
            messages: FallbackMessages::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// Poll retry policy. "Too early" responses never count against max_retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub fallback_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            fallback_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }
}

// User-facing messages used when the server does not supply one
#[derive(Debug, Clone)]
pub struct FallbackMessages {
    pub poll_failed: String,
    pub network_failed: String,
    pub start_failed: String,
    pub search_failed: String,
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            poll_failed: "Could not fetch tour search results.".to_string(),
            network_failed: "A network error occurred. Please try again later.".to_string(),
            start_failed: "Could not start the tour search. Please try again.".to_string(),
            search_failed: "Tour search failed. Please try again later.".to_string(),
        }
    }
}

// Remote operations the orchestrator depends on
#[async_trait]
pub trait SearchApi: Send + Sync + 'static {
    async fn start(&self, selection_id: &str) -> Result<StartSearchResponse, ApiError>;

    async fn poll(&self, token: &SearchToken) -> Result<PriceMap, ApiError>;

    // Advisory; callers ignore the outcome
    async fn stop(&self, token: &SearchToken) -> Result<(), ApiError>;

    async fn countries(&self) -> Result<CountriesMap, ApiError>;

    async fn hotels(&self, country_id: &str) -> Result<HotelsMap, ApiError>;

    async fn geo_search(&self, query: &str) -> Result<GeoResponseMap, ApiError>;
}

pub struct HttpSearchApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSearchApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_millis(config.timeout_ms));
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Bytes, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(ApiError::http(status.as_u16(), decode_error_payload(&body)))
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let body = self.send(request).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Network(format!("invalid response body: {e}")))
    }
}

// Error bodies are best effort: anything undecodable is an empty payload
pub fn decode_error_payload(body: &Bytes) -> ApiErrorPayload {
    if body.is_empty() {
        return ApiErrorPayload::default();
    }
    serde_json::from_slice(body).unwrap_or_default()
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn start(&self, selection_id: &str) -> Result<StartSearchResponse, ApiError> {
        let request = self
            .http
            .request(Method::POST, self.url("/search/prices"))
            .json(&serde_json::json!({ "countryID": selection_id }));
        self.send_json(request).await
    }

    async fn poll(&self, token: &SearchToken) -> Result<PriceMap, ApiError> {
        let request = self
            .http
            .get(self.url(&format!("/search/prices/{}", token.as_str())));
        let response: SearchPricesResponse = self.send_json(request).await?;
        Ok(response.prices.unwrap_or_default())
    }

    async fn stop(&self, token: &SearchToken) -> Result<(), ApiError> {
        let request = self
            .http
            .delete(self.url(&format!("/search/prices/{}", token.as_str())));
        self.send(request).await.map(|_| ())
    }

    async fn countries(&self) -> Result<CountriesMap, ApiError> {
        self.send_json(self.http.get(self.url("/countries"))).await
    }

    async fn hotels(&self, country_id: &str) -> Result<HotelsMap, ApiError> {
        let request = self
            .http
            .get(self.url("/hotels"))
            .query(&[("countryID", country_id)]);
        self.send_json(request).await
    }

    async fn geo_search(&self, query: &str) -> Result<GeoResponseMap, ApiError> {
        let request = self.http.get(self.url("/geo")).query(&[("search", query)]);
        self.send_json(request).await
    }
}
