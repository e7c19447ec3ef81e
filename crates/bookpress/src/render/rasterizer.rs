//! Turns one page into pixels through the snapshotter.

use chrono::Duration as ChronoDuration;
use image::{ImageFormat, ImageReader};
use log::{debug, warn};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::clock::Clock;
use crate::geometry::{BookSize, BLEED_INCHES, EDITOR_DPI};

use super::snapshot::{SnapshotError, SnapshotRequest, Snapshotter, Viewport};
use super::token::{RenderSubject, RenderTokenIssuer, TokenError};
use super::view::{PageViewParams, ViewError, READY_SELECTOR};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render token error: {0}")]
    Token(#[from] TokenError),

    #[error("Render target rejected the token for '{0}'")]
    Unauthorized(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("Rendering '{subject}' timed out after {limit:?}")]
    Timeout { subject: String, limit: Duration },

    #[error("Invalid render target: {0}")]
    InvalidTarget(String),

    #[error("Snapshot of '{subject}' is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        subject: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Snapshot of '{subject}' failed: {source}")]
    Snapshot {
        subject: String,
        #[source]
        source: SnapshotError,
    },

    #[error("Failed to decode snapshot of '{subject}': {message}")]
    Decode { subject: String, message: String },

    #[error("Invalid render URL: {0}")]
    Url(String),
}

impl From<ViewError> for RenderError {
    fn from(e: ViewError) -> Self {
        RenderError::Url(e.to_string())
    }
}

/// Rasterizer settings.
#[derive(Debug, Clone)]
pub struct RasterSettings {
    /// Base URL under which the render views are served.
    pub render_base_url: String,
    pub token_ttl: ChronoDuration,
    /// Bounded wait for a single snapshot.
    pub snapshot_timeout: Duration,
    pub output_dpi: f64,
}

impl RasterSettings {
    /// Multiplier from editor units to output pixels.
    pub fn scale(&self) -> f64 {
        self.output_dpi / EDITOR_DPI
    }

    pub fn bleed_px(&self) -> u32 {
        default_bleed_px(self.output_dpi)
    }

    /// Full page size including bleed on every side.
    pub fn page_viewport(&self, book_size: BookSize) -> Viewport {
        page_viewport(book_size, self.output_dpi, self.bleed_px())
    }
}

/// Print bleed rounded to whole pixels at `dpi`.
pub fn default_bleed_px(dpi: f64) -> u32 {
    (BLEED_INCHES * dpi).round() as u32
}

/// Trim size at `dpi` plus `bleed_px` on every side.
pub fn page_viewport(book_size: BookSize, dpi: f64, bleed_px: u32) -> Viewport {
    let (w, h) = book_size.trim_inches();
    Viewport {
        width: (w * dpi).round() as u32 + 2 * bleed_px,
        height: (h * dpi).round() as u32 + 2 * bleed_px,
    }
}

/// A captured page image.
#[derive(Debug, Clone)]
pub struct RasterizedPage {
    pub page_id: String,
    pub width: u32,
    pub height: u32,
    pub dpi: f64,
    /// Whole pixels of bleed on every side of the trim.
    pub bleed_px: u32,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

pub struct PageRasterizer {
    issuer: Arc<RenderTokenIssuer>,
    snapshotter: Arc<dyn Snapshotter>,
    clock: Arc<dyn Clock>,
    settings: RasterSettings,
}

impl PageRasterizer {
    pub fn new(
        issuer: Arc<RenderTokenIssuer>,
        snapshotter: Arc<dyn Snapshotter>,
        clock: Arc<dyn Clock>,
        settings: RasterSettings,
    ) -> Self {
        Self {
            issuer,
            snapshotter,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &RasterSettings {
        &self.settings
    }

    pub fn issuer(&self) -> &Arc<RenderTokenIssuer> {
        &self.issuer
    }

    /// Issues a fresh token for `subject`.
    pub fn issue_token(&self, family_id: &str, subject: RenderSubject) -> Result<String, RenderError> {
        Ok(self.issuer.issue(
            family_id,
            subject,
            self.settings.token_ttl,
            self.clock.now(),
        )?)
    }

    /// Renders one page at `scale` editor units per output pixel.
    ///
    /// `bleed_px` defaults to the print bleed at the resulting resolution and
    /// is rounded to whole pixels before it reaches the view, the viewport and
    /// the returned page.
    pub async fn rasterize_page(
        &self,
        family_id: &str,
        page_id: &str,
        book_size: BookSize,
        scale: f64,
        bleed_px: Option<f64>,
    ) -> Result<RasterizedPage, RenderError> {
        let span = tracing::info_span!("render_page", family_id = %family_id, page_id = %page_id);
        async {
            let (dpi, bleed) = resolve_target(scale, bleed_px)?;
            let token = self.issue_token(family_id, RenderSubject::page(page_id))?;
            let url = PageViewParams {
                family_id: family_id.to_string(),
                page_id: page_id.to_string(),
                book_size,
                token: Some(token),
                scale,
                bleed_px: bleed as f64,
            }
            .to_url(&self.settings.render_base_url)?;

            let viewport = page_viewport(book_size, dpi, bleed);
            let (format, bytes) = self.capture(page_id, url, viewport).await?;

            Ok(RasterizedPage {
                page_id: page_id.to_string(),
                width: viewport.width,
                height: viewport.height,
                dpi,
                bleed_px: bleed,
                format,
                bytes,
            })
        }
        .instrument(span)
        .await
    }

    /// Captures `url` and checks the image matches `viewport` exactly.
    pub async fn capture(
        &self,
        subject: &str,
        url: String,
        viewport: Viewport,
    ) -> Result<(ImageFormat, Vec<u8>), RenderError> {
        let request = SnapshotRequest {
            url,
            viewport,
            ready_selector: READY_SELECTOR.to_string(),
            timeout: self.settings.snapshot_timeout,
        };

        debug!(
            "Capturing '{}' at {}x{}",
            subject, viewport.width, viewport.height
        );

        let timeout_error = || RenderError::Timeout {
            subject: subject.to_string(),
            limit: self.settings.snapshot_timeout,
        };

        let bytes = match tokio::time::timeout(
            self.settings.snapshot_timeout,
            self.snapshotter.capture(&request),
        )
        .await
        {
            Err(_) => {
                warn!("Snapshot of '{}' exceeded its deadline", subject);
                return Err(timeout_error());
            }
            Ok(Err(SnapshotError::NotFound)) => return Err(RenderError::NotFound(subject.to_string())),
            Ok(Err(SnapshotError::Unauthorized)) => {
                return Err(RenderError::Unauthorized(subject.to_string()))
            }
            Ok(Err(SnapshotError::Timeout)) => return Err(timeout_error()),
            Ok(Err(source)) => {
                return Err(RenderError::Snapshot {
                    subject: subject.to_string(),
                    source,
                })
            }
            Ok(Ok(bytes)) => bytes,
        };

        let (format, actual) = read_image_header(&bytes).map_err(|message| RenderError::Decode {
            subject: subject.to_string(),
            message,
        })?;
        let expected = (viewport.width, viewport.height);
        if actual != expected {
            return Err(RenderError::DimensionMismatch {
                subject: subject.to_string(),
                expected,
                actual,
            });
        }

        Ok((format, bytes))
    }
}

/// Output dpi and whole-pixel bleed for a render call.
fn resolve_target(scale: f64, bleed_px: Option<f64>) -> Result<(f64, u32), RenderError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(RenderError::InvalidTarget(format!("scale {} must be positive", scale)));
    }
    let dpi = scale * EDITOR_DPI;
    let bleed = match bleed_px {
        None => default_bleed_px(dpi),
        Some(px) if px.is_finite() && px >= 0.0 => px.round() as u32,
        Some(px) => {
            return Err(RenderError::InvalidTarget(format!(
                "bleed {} must be non-negative",
                px
            )))
        }
    };
    Ok((dpi, bleed))
}

/// Reads the format and dimensions without decoding pixel data.
fn read_image_header(bytes: &[u8]) -> Result<(ImageFormat, (u32, u32)), String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let format = reader
        .format()
        .ok_or_else(|| "unrecognised image format".to_string())?;
    let dimensions = reader.into_dimensions().map_err(|e| e.to_string())?;
    Ok((format, dimensions))
}
