//! Tokenized render view for a cover spread.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::render::token::{RenderSubject, RenderTokenIssuer};
use crate::render::view::{document, html_escape, RenderedView, ViewError};

use super::geometry::{CoverGeometry, CoverSpec};
use super::layout::{compose_layout, CoverDesign, CoverElement, CoverLayout};

/// Everything the cover view needs, carried in the URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverRenderParams {
    pub spec: CoverSpec,
    pub design: CoverDesign,
    pub dpi: f64,
    #[serde(default)]
    pub show_guides: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverViewParams {
    pub family_id: String,
    pub token: Option<String>,
    pub params: CoverRenderParams,
}

impl CoverViewParams {
    /// `{base}/render-cover/{family}?token=..&params=..`
    pub fn to_url(&self, base_url: &str) -> Result<String, ViewError> {
        let encoded = serde_json::to_vec(&self.params)
            .map(|json| URL_SAFE_NO_PAD.encode(json))
            .map_err(|e| ViewError::BadRequest(e.to_string()))?;

        let mut url = Url::parse(base_url)
            .map_err(|e| ViewError::BadRequest(format!("invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ViewError::BadRequest("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["render-cover", self.family_id.as_str()]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            query.append_pair("params", &encoded);
        }
        Ok(url.into())
    }

    pub fn from_url(raw: &str) -> Result<Self, ViewError> {
        let url = Url::parse(raw).map_err(|e| ViewError::BadRequest(e.to_string()))?;
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        let [.., "render-cover", family_id] = segments.as_slice() else {
            return Err(ViewError::BadRequest("expected /render-cover/{family}".to_string()));
        };
        let family_id = family_id.to_string();

        let mut token = None;
        let mut params = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "token" => token = Some(value.into_owned()),
                "params" => {
                    let json = URL_SAFE_NO_PAD
                        .decode(value.as_bytes())
                        .map_err(|_| ViewError::BadRequest("params not base64".to_string()))?;
                    params = Some(
                        serde_json::from_slice(&json)
                            .map_err(|e| ViewError::BadRequest(e.to_string()))?,
                    );
                }
                _ => {}
            }
        }

        Ok(Self {
            family_id,
            token,
            params: params.ok_or_else(|| ViewError::BadRequest("missing params".to_string()))?,
        })
    }
}

/// Verifies the token and produces the cover document.
pub fn render_cover(
    issuer: &RenderTokenIssuer,
    view: &CoverViewParams,
    now: DateTime<Utc>,
) -> Result<RenderedView, ViewError> {
    issuer.verify(
        view.token.as_deref(),
        &view.family_id,
        &RenderSubject::Cover,
        now,
    )?;

    let dpi = view.params.dpi;
    if !(dpi.is_finite() && dpi > 0.0) {
        return Err(ViewError::BadRequest("dpi must be positive".to_string()));
    }
    let geometry = CoverGeometry::compute_at(view.params.spec, dpi);
    let layout = compose_layout(&geometry, &view.params.design)
        .map_err(|e| ViewError::BadRequest(e.to_string()))?;

    Ok(RenderedView {
        width_px: layout.width_px,
        height_px: layout.height_px,
        html: cover_document(&layout, view.params.show_guides),
    })
}

pub fn cover_document(layout: &CoverLayout, show_guides: bool) -> String {
    let mut body = String::new();
    for element in &layout.elements {
        match element {
            CoverElement::Fill { rect, color } | CoverElement::Rule { rect, color } => {
                let _ = write!(
                    body,
                    "<div class=\"item\" style=\"{}background:{};\"></div>",
                    position(rect.x, rect.y, rect.width, rect.height),
                    html_escape(color)
                );
            }
            CoverElement::Image { rect, src } => {
                let _ = write!(
                    body,
                    "<div class=\"item\" style=\"{}\"><img src=\"{}\" alt=\"\"></div>",
                    position(rect.x, rect.y, rect.width, rect.height),
                    html_escape(src)
                );
            }
            CoverElement::Text {
                rect,
                text,
                font_px,
                color,
                rotation,
            } => {
                // Quarter turns swap the box so the text runs along the long side.
                let quarter = (rotation.rem_euclid(180.0) - 90.0).abs() < 1e-9;
                let (w, h) = if quarter {
                    (rect.height, rect.width)
                } else {
                    (rect.width, rect.height)
                };
                let _ = write!(
                    body,
                    "<div class=\"item\" style=\"{}display:flex;align-items:center;justify-content:center;text-align:center;white-space:nowrap;font-size:{:.3}px;color:{};transform:translate(-50%,-50%) rotate({}deg);\">{}</div>",
                    position(rect.x + rect.width / 2.0, rect.y + rect.height / 2.0, w, h),
                    font_px,
                    html_escape(color),
                    rotation,
                    html_escape(text)
                );
            }
            CoverElement::Guide { rect } if show_guides => {
                let _ = write!(
                    body,
                    "<div class=\"item guide\" style=\"{}outline:1px dashed rgba(0,0,0,0.35);\"></div>",
                    position(rect.x, rect.y, rect.width, rect.height)
                );
            }
            CoverElement::Guide { .. } => {}
        }
    }

    document(
        layout.width_px as f64,
        layout.height_px as f64,
        "#ffffff",
        &body,
    )
}

fn position(x: f64, y: f64, w: f64, h: f64) -> String {
    format!(
        "left:{:.3}px;top:{:.3}px;width:{:.3}px;height:{:.3}px;",
        x, y, w, h
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover::geometry::{CoverType, PaperType};
    use crate::cover::layout::CoverMode;
    use crate::geometry::BookSize;
    use crate::render::token::TokenError;
    use chrono::Duration;

    fn params(show_guides: bool) -> CoverRenderParams {
        CoverRenderParams {
            spec: CoverSpec {
                book_size: BookSize::LargeSquare,
                page_count: 150,
                paper_type: PaperType::Premium,
                cover_type: CoverType::Hard,
            },
            design: CoverDesign {
                mode: CoverMode::Wraparound,
                primary_color: "#000000".to_string(),
                secondary_color: "#ffffff".to_string(),
                family_name: "Okafor & Sons".to_string(),
                title: None,
                front_image: None,
                wrap_image: Some("https://img/wrap.jpg".to_string()),
            },
            dpi: 30.0,
            show_guides,
        }
    }

    #[test]
    fn test_url_round_trip() {
        let view = CoverViewParams {
            family_id: "fam-9".to_string(),
            token: Some("abc".to_string()),
            params: params(true),
        };
        let url = view.to_url("http://render.local").unwrap();
        assert!(url.starts_with("http://render.local/render-cover/fam-9?"));
        assert_eq!(CoverViewParams::from_url(&url).unwrap(), view);
    }

    #[test]
    fn test_guides_only_in_preview() {
        let issuer = RenderTokenIssuer::new(&[3u8; 32]).unwrap();
        let now = Utc::now();
        let token = issuer
            .issue("fam-9", RenderSubject::Cover, Duration::minutes(1), now)
            .unwrap();

        for show in [true, false] {
            let view = CoverViewParams {
                family_id: "fam-9".to_string(),
                token: Some(token.clone()),
                params: params(show),
            };
            let rendered = render_cover(&issuer, &view, now).unwrap();
            assert_eq!(rendered.html.contains("guide"), show);
        }
    }

    #[test]
    fn test_page_token_cannot_render_cover() {
        let issuer = RenderTokenIssuer::new(&[3u8; 32]).unwrap();
        let now = Utc::now();
        let token = issuer
            .issue("fam-9", RenderSubject::page("p1"), Duration::minutes(1), now)
            .unwrap();
        let view = CoverViewParams {
            family_id: "fam-9".to_string(),
            token: Some(token),
            params: params(false),
        };
        assert!(matches!(
            render_cover(&issuer, &view, now),
            Err(ViewError::Token(TokenError::SubjectMismatch))
        ));
    }
}
