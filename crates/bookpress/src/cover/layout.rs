//! Cover design modes and the element layout computed from them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::geometry::{CoverGeometry, PanelRect};

static RE_HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());

/// Watermark printed on the back cover of solid designs.
pub const WATERMARK_TEXT: &str = "Made with Bookpress";

/// Inset from the trim line kept clear of cover text, in inches.
const TEXT_SAFE_INCHES: f64 = 0.375;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverMode {
    #[default]
    Solid,
    FrontImage,
    Wraparound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverDesign {
    #[serde(default)]
    pub mode: CoverMode,
    pub primary_color: String,
    pub secondary_color: String,
    pub family_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_image: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DesignError {
    #[error("{field} must be a #RRGGBB colour, got '{value}'")]
    InvalidColor { field: &'static str, value: String },

    #[error("{0} cover requires an image")]
    MissingImage(&'static str),
}

impl CoverDesign {
    pub fn validate(&self) -> Result<(), DesignError> {
        for (field, value) in [
            ("primaryColor", &self.primary_color),
            ("secondaryColor", &self.secondary_color),
        ] {
            if !RE_HEX_COLOR.is_match(value) {
                return Err(DesignError::InvalidColor {
                    field,
                    value: value.clone(),
                });
            }
        }

        match self.mode {
            CoverMode::FrontImage if is_blank(&self.front_image) => {
                Err(DesignError::MissingImage("front-image"))
            }
            CoverMode::Wraparound if is_blank(&self.wrap_image) => {
                Err(DesignError::MissingImage("wraparound"))
            }
            _ => Ok(()),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// One drawable on the cover canvas. Rectangles are in output pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoverElement {
    Fill {
        rect: PanelRect,
        color: String,
    },
    /// Image scaled to cover `rect` and cropped to it.
    Image {
        rect: PanelRect,
        src: String,
    },
    Text {
        rect: PanelRect,
        text: String,
        font_px: f64,
        color: String,
        /// Clockwise rotation in degrees about the centre of `rect`.
        rotation: f64,
    },
    Rule {
        rect: PanelRect,
        color: String,
    },
    /// Preview-only marker, never printed.
    Guide {
        rect: PanelRect,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLayout {
    pub width_px: u32,
    pub height_px: u32,
    pub elements: Vec<CoverElement>,
}

/// Lays out `design` on the spread described by `geometry`.
pub fn compose_layout(
    geometry: &CoverGeometry,
    design: &CoverDesign,
) -> Result<CoverLayout, DesignError> {
    design.validate()?;

    let canvas = geometry.canvas();
    let mut elements = Vec::new();

    match design.mode {
        CoverMode::Solid => {
            elements.push(CoverElement::Fill {
                rect: canvas,
                color: design.primary_color.clone(),
            });
            elements.extend(back_watermark(geometry, design));
            elements.extend(spine_title(geometry, design, &design.secondary_color));
            elements.extend(front_title_block(geometry, design));
        }
        CoverMode::FrontImage => {
            elements.push(CoverElement::Fill {
                rect: canvas,
                color: design.primary_color.clone(),
            });
            let spine_band = PanelRect {
                x: geometry.spine.x,
                y: 0.0,
                width: geometry.spine.width,
                height: canvas.height,
            };
            if let Some(rect) = spine_band.clip_to(&canvas) {
                elements.push(CoverElement::Fill {
                    rect,
                    color: darken(&design.primary_color, 0.75),
                });
            }
            let front_band = PanelRect {
                x: geometry.front.x,
                y: 0.0,
                width: canvas.width - geometry.front.x,
                height: canvas.height,
            };
            if let (Some(rect), Some(src)) = (front_band.clip_to(&canvas), &design.front_image) {
                elements.push(CoverElement::Image {
                    rect,
                    src: src.clone(),
                });
            }
            elements.extend(back_watermark(geometry, design));
            elements.extend(spine_title(geometry, design, &design.secondary_color));
        }
        CoverMode::Wraparound => {
            if let Some(src) = &design.wrap_image {
                elements.push(CoverElement::Image {
                    rect: canvas,
                    src: src.clone(),
                });
            }
            if geometry.spine.width > 0.0 {
                elements.push(CoverElement::Guide {
                    rect: geometry.spine,
                });
            }
        }
    }

    Ok(CoverLayout {
        width_px: geometry.width_px,
        height_px: geometry.height_px,
        elements,
    })
}

fn back_watermark(geometry: &CoverGeometry, design: &CoverDesign) -> Option<CoverElement> {
    let safe = geometry.back.inset(TEXT_SAFE_INCHES * geometry.dpi);
    let height = 0.3 * geometry.dpi;
    let rect = PanelRect {
        x: safe.x,
        y: safe.bottom() - height,
        width: safe.width,
        height,
    }
    .clip_to(&geometry.back)?;

    Some(CoverElement::Text {
        rect,
        text: WATERMARK_TEXT.to_string(),
        font_px: 0.12 * geometry.dpi,
        color: design.secondary_color.clone(),
        rotation: 0.0,
    })
}

fn spine_title(
    geometry: &CoverGeometry,
    design: &CoverDesign,
    color: &str,
) -> Option<CoverElement> {
    if !geometry.spine_has_text() || design.family_name.trim().is_empty() {
        return None;
    }
    let rect = geometry
        .spine
        .inset(0.1 * geometry.dpi)
        .clip_to(&geometry.spine)?;
    let font_px = (geometry.spine.width * 0.55).min(0.25 * geometry.dpi);

    Some(CoverElement::Text {
        rect,
        text: design.family_name.clone(),
        font_px,
        color: color.to_string(),
        rotation: 90.0,
    })
}

fn front_title_block(geometry: &CoverGeometry, design: &CoverDesign) -> Vec<CoverElement> {
    let front = &geometry.front;
    let safe = front.inset(TEXT_SAFE_INCHES * geometry.dpi);
    let dpi = geometry.dpi;
    let name_height = 0.6 * dpi;
    let title_height = 0.4 * dpi;
    let rule_height = (0.02 * dpi).max(1.0);
    let rule_width = safe.width * 0.4;
    let center_y = front.y + front.height / 2.0;

    let mut candidates = vec![
        CoverElement::Rule {
            rect: PanelRect {
                x: front.center_x() - rule_width / 2.0,
                y: center_y - name_height / 2.0 - 0.15 * dpi,
                width: rule_width,
                height: rule_height,
            },
            color: design.secondary_color.clone(),
        },
        CoverElement::Text {
            rect: PanelRect {
                x: safe.x,
                y: center_y - name_height / 2.0,
                width: safe.width,
                height: name_height,
            },
            text: design.family_name.clone(),
            font_px: 0.45 * dpi,
            color: design.secondary_color.clone(),
            rotation: 0.0,
        },
    ];

    let mut bottom = center_y + name_height / 2.0;
    if let Some(title) = design.title.as_ref().filter(|t| !t.trim().is_empty()) {
        candidates.push(CoverElement::Text {
            rect: PanelRect {
                x: safe.x,
                y: bottom,
                width: safe.width,
                height: title_height,
            },
            text: title.clone(),
            font_px: 0.28 * dpi,
            color: design.secondary_color.clone(),
            rotation: 0.0,
        });
        bottom += title_height;
    }

    candidates.push(CoverElement::Rule {
        rect: PanelRect {
            x: front.center_x() - rule_width / 2.0,
            y: bottom + 0.15 * dpi,
            width: rule_width,
            height: rule_height,
        },
        color: design.secondary_color.clone(),
    });

    candidates
        .into_iter()
        .filter_map(|element| clip_element(element, front))
        .collect()
}

fn clip_element(element: CoverElement, bounds: &PanelRect) -> Option<CoverElement> {
    Some(match element {
        CoverElement::Fill { rect, color } => CoverElement::Fill {
            rect: rect.clip_to(bounds)?,
            color,
        },
        CoverElement::Image { rect, src } => CoverElement::Image {
            rect: rect.clip_to(bounds)?,
            src,
        },
        CoverElement::Text {
            rect,
            text,
            font_px,
            color,
            rotation,
        } => CoverElement::Text {
            rect: rect.clip_to(bounds)?,
            text,
            font_px,
            color,
            rotation,
        },
        CoverElement::Rule { rect, color } => CoverElement::Rule {
            rect: rect.clip_to(bounds)?,
            color,
        },
        CoverElement::Guide { rect } => CoverElement::Guide {
            rect: rect.clip_to(bounds)?,
        },
    })
}

/// Scales each channel of a `#RRGGBB` colour by `factor`.
pub fn darken(hex: &str, factor: f64) -> String {
    if !RE_HEX_COLOR.is_match(hex) {
        return hex.to_string();
    }
    let channel = |i: usize| {
        let value = u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
        (value as f64 * factor.clamp(0.0, 1.0)).round() as u8
    };
    format!("#{:02x}{:02x}{:02x}", channel(1), channel(3), channel(5))
}
