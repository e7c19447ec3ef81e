use image::ImageFormat;
use log::info;
use std::sync::Arc;
use tracing::Instrument;

use crate::render::{PageRasterizer, RenderError, RenderSubject, Viewport};

use super::geometry::{CoverGeometry, CoverSpec};
use super::layout::{CoverDesign, DesignError};
use super::view::{CoverRenderParams, CoverViewParams};

#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("Invalid cover design: {0}")]
    Design(#[from] DesignError),

    #[error("Cover render failed: {0}")]
    Render(#[from] RenderError),
}

/// A rasterized cover spread.
#[derive(Debug, Clone)]
pub struct CoverArt {
    pub geometry: CoverGeometry,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// Rasterizes cover spreads through the same snapshot path as pages.
pub struct CoverComposer {
    rasterizer: Arc<PageRasterizer>,
    dpi: f64,
}

impl CoverComposer {
    pub fn new(rasterizer: Arc<PageRasterizer>, dpi: f64) -> Self {
        Self { rasterizer, dpi }
    }

    pub fn geometry(&self, spec: CoverSpec) -> CoverGeometry {
        CoverGeometry::compute_at(spec, self.dpi)
    }

    pub async fn compose(
        &self,
        family_id: &str,
        spec: CoverSpec,
        design: &CoverDesign,
    ) -> Result<CoverArt, CoverError> {
        design.validate()?;
        let span = tracing::info_span!("compose_cover", family_id = %family_id, pages = spec.page_count);

        async {
            let geometry = self.geometry(spec);
            let token = self
                .rasterizer
                .issue_token(family_id, RenderSubject::Cover)?;
            let url = CoverViewParams {
                family_id: family_id.to_string(),
                token: Some(token),
                params: CoverRenderParams {
                    spec,
                    design: design.clone(),
                    dpi: self.dpi,
                    show_guides: false,
                },
            }
            .to_url(&self.rasterizer.settings().render_base_url)
            .map_err(RenderError::from)?;

            let viewport = Viewport {
                width: geometry.width_px,
                height: geometry.height_px,
            };
            let (format, bytes) = self.rasterizer.capture("cover", url, viewport).await?;

            info!(
                "Composed {} cover {}x{}px (spine {:.3}in)",
                spec.cover_type.as_str(),
                geometry.width_px,
                geometry.height_px,
                geometry.spine_inches
            );

            Ok(CoverArt {
                geometry,
                format,
                bytes,
            })
        }
        .instrument(span)
        .await
    }
}
