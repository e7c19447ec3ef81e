//! Headless-browser snapshotting behind a small trait.
//!
//! The production implementation talks to a screenshot service over HTTP.
//! The service navigates to the render URL, waits for the readiness selector
//! and returns a PNG of exactly the requested viewport. When the target view
//! answers with an error status the service relays that status.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

/// Default connect timeout for the snapshot service.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of bytes of an error body kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A single capture request.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    pub url: String,
    pub viewport: Viewport,
    /// CSS selector that matches once the view has finished loading.
    pub ready_selector: String,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Render target not found")]
    NotFound,

    #[error("Render target rejected the request")]
    Unauthorized,

    #[error("Snapshot timed out")]
    Timeout,

    #[error("Snapshot service error: {0}")]
    Service(String),
}

/// Captures a rendered URL as image bytes of the requested viewport.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn capture(&self, request: &SnapshotRequest) -> Result<Vec<u8>, SnapshotError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureBody<'a> {
    url: &'a str,
    viewport: Viewport,
    wait_for_selector: &'a str,
    timeout_ms: u64,
    full_page: bool,
    #[serde(rename = "type")]
    image_type: &'static str,
}

/// Snapshotter backed by an HTTP screenshot service.
pub struct HttpSnapshotter {
    client: Client,
    endpoint: String,
}

impl HttpSnapshotter {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SnapshotError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SnapshotError::Service(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Snapshotter for HttpSnapshotter {
    async fn capture(&self, request: &SnapshotRequest) -> Result<Vec<u8>, SnapshotError> {
        let body = CaptureBody {
            url: &request.url,
            viewport: request.viewport,
            wait_for_selector: &request.ready_selector,
            timeout_ms: request.timeout.as_millis() as u64,
            full_page: false,
            image_type: "png",
        };

        debug!(
            "Requesting {}x{} snapshot from {}",
            request.viewport.width, request.viewport.height, self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SnapshotError::Timeout
                } else {
                    SnapshotError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                SnapshotError::Timeout
            } else {
                SnapshotError::Service(e.to_string())
            }
        })?;
        Ok(bytes.to_vec())
    }
}

fn map_status(status: StatusCode, body: &str) -> SnapshotError {
    match status {
        StatusCode::NOT_FOUND => SnapshotError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SnapshotError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SnapshotError::Timeout,
        _ => {
            let body: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            SnapshotError::Service(format!("{}: {}", status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(StatusCode::NOT_FOUND, ""), SnapshotError::NotFound);
        assert_eq!(
            map_status(StatusCode::FORBIDDEN, ""),
            SnapshotError::Unauthorized
        );
        assert_eq!(
            map_status(StatusCode::GATEWAY_TIMEOUT, ""),
            SnapshotError::Timeout
        );
        assert!(matches!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(500)),
            SnapshotError::Service(msg) if msg.len() < 300
        ));
    }

    #[test]
    fn test_capture_body_shape() {
        let body = CaptureBody {
            url: "http://render/x",
            viewport: Viewport {
                width: 10,
                height: 20,
            },
            wait_for_selector: "body",
            timeout_ms: 1000,
            full_page: false,
            image_type: "png",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["waitForSelector"], "body");
        assert_eq!(json["viewport"]["height"], 20);
        assert_eq!(json["type"], "png");
    }
}
