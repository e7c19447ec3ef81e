//! Print provider seam and its HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::cover::{CoverType, PaperType};
use crate::geometry::BookSize;

use super::order::{ShippingAddress, ShippingLevel};
use super::pricing::{CostBreakdown, QuoteRequest};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Print provider unavailable: {0}")]
    Unavailable(String),

    #[error("Print provider timed out")]
    Timeout,

    #[error("Print provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Print provider sent an unreadable response: {0}")]
    InvalidResponse(String),
}

/// A print job handed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSubmission {
    /// Our order id, echoed back by the provider.
    pub external_id: String,
    pub title: String,
    pub book_size: BookSize,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub page_count: u32,
    pub quantity: u32,
    pub interior_url: String,
    pub cover_url: String,
    pub shipping_level: ShippingLevel,
    pub shipping_address: ShippingAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReceipt {
    pub provider_order_id: String,
    pub status: String,
}

#[async_trait]
pub trait PrintProvider: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<CostBreakdown, ProviderError>;

    async fn submit(&self, submission: &PrintSubmission) -> Result<ProviderReceipt, ProviderError>;

    /// Raw provider status string for a submitted order.
    async fn order_status(&self, provider_order_id: &str) -> Result<String, ProviderError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    printing_cents: u64,
    shipping_cents: u64,
    total_cents: u64,
    currency: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Provider reached over its JSON HTTP API with a bearer key.
pub struct HttpPrintProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpPrintProvider {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PrintProvider for HttpPrintProvider {
    async fn quote(&self, request: &QuoteRequest) -> Result<CostBreakdown, ProviderError> {
        debug!(
            "Requesting quote for {} {} pages x{}",
            request.book_size, request.page_count, request.quantity
        );
        let quote: QuoteResponse = self
            .send_json(self.client.post(self.endpoint("print-jobs/cost-calculations")).json(request))
            .await?;
        Ok(CostBreakdown {
            printing_cents: quote.printing_cents,
            shipping_cents: quote.shipping_cents,
            total_cents: quote.total_cents,
            currency: quote.currency,
            is_estimate: false,
        })
    }

    async fn submit(&self, submission: &PrintSubmission) -> Result<ProviderReceipt, ProviderError> {
        debug!("Submitting print job for order {}", submission.external_id);
        self.send_json(self.client.post(self.endpoint("print-jobs")).json(submission))
            .await
    }

    async fn order_status(&self, provider_order_id: &str) -> Result<String, ProviderError> {
        let path = format!("print-jobs/{}/status", provider_order_id);
        let status: StatusResponse = self.send_json(self.client.get(self.endpoint(&path))).await?;
        Ok(status.status)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        s if s.is_server_error() => ProviderError::Unavailable(format!("HTTP {}", s.as_u16())),
        s => ProviderError::Rejected {
            status: s.as_u16(),
            message: body.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
        },
    }
}
