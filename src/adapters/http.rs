//! HTTP enrichment provider.
//!
//! POSTs the enrichment request as JSON and expects
//! `{"attributes": {...}}` back. The request's idempotency key travels in the
//! `Idempotency-Key` header so providers can deduplicate retries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{CapabilityError, Enricher};
use crate::domain::{EnrichmentRequest, EnrichmentResponse, Payload};

/// Enricher backed by a JSON-over-HTTP endpoint
pub struct HttpEnricher {
    /// Endpoint receiving POSTed requests
    url: String,
    /// HTTP client
    client: reqwest::Client,
}

/// Response body from the provider
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    attributes: Payload,
}

impl HttpEnricher {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Use a preconfigured client (proxies, TLS, connection pool sizing)
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    fn name(&self) -> &str {
        "http"
    }

    async fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, CapabilityError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Provider returned {}: {}", status, body.trim());
            return Err(if is_transient_status(status) {
                CapabilityError::transient(message)
            } else {
                CapabilityError::permanent(message)
            });
        }

        let body: ProviderResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::permanent(format!("Failed to parse provider response: {}", e)))?;

        Ok(EnrichmentResponse::new(body.attributes))
    }
}

/// Rate limiting, request timeouts and server errors are expected to clear up
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_send_error(err: reqwest::Error) -> CapabilityError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CapabilityError::transient(format!("Provider unreachable: {}", err))
    } else {
        CapabilityError::permanent(format!("Provider request failed: {}", err))
    }
}
