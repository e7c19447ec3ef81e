//! Cover spread geometry: back panel, spine and front panel.
//!
//! The spread is laid out left to right as back, spine, front. Hardcovers
//! add a wrap margin around the outside of the spread that folds over the
//! board; the bleed sits outside that.

use serde::{Deserialize, Serialize};

use crate::geometry::BookSize;

/// Bleed around the whole cover spread, in inches.
pub const COVER_BLEED_INCHES: f64 = 0.125;

/// Board wrap added on every outer edge of a hardcover, in inches.
pub const HARDCOVER_WRAP_INCHES: f64 = 0.75;

/// Cover output resolution.
pub const COVER_DPI: f64 = 300.0;

/// Minimum spine width for spine text to be legible, in inches.
pub const SPINE_TEXT_MIN_INCHES: f64 = 0.25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperType {
    #[default]
    Standard,
    Premium,
}

impl PaperType {
    /// Spine thickness contributed by one page, in inches.
    pub fn spine_inches_per_page(self) -> f64 {
        match self {
            PaperType::Standard => 0.002252,
            PaperType::Premium => 0.0025,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperType::Standard => "standard",
            PaperType::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [PaperType::Standard, PaperType::Premium]
            .into_iter()
            .find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverType {
    #[default]
    Soft,
    Hard,
}

impl CoverType {
    pub fn wrap_inches(self) -> f64 {
        match self {
            CoverType::Soft => 0.0,
            CoverType::Hard => HARDCOVER_WRAP_INCHES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoverType::Soft => "soft",
            CoverType::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [CoverType::Soft, CoverType::Hard]
            .into_iter()
            .find(|c| c.as_str() == s)
    }
}

/// Inputs that determine the cover geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverSpec {
    pub book_size: BookSize,
    pub page_count: u32,
    #[serde(default)]
    pub paper_type: PaperType,
    #[serde(default)]
    pub cover_type: CoverType,
}

/// Rectangle in output pixels, relative to the top-left of the full spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PanelRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    /// Shrinks the rectangle by `by` on every side.
    pub fn inset(&self, by: f64) -> PanelRect {
        let dx = by.min(self.width / 2.0);
        let dy = by.min(self.height / 2.0);
        PanelRect {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width - 2.0 * dx,
            height: self.height - 2.0 * dy,
        }
    }

    /// Clips `self` to `bounds`. Returns `None` if nothing remains.
    pub fn clip_to(&self, bounds: &PanelRect) -> Option<PanelRect> {
        let left = self.x.max(bounds.x);
        let top = self.y.max(bounds.y);
        let right = self.right().min(bounds.right());
        let bottom = self.bottom().min(bounds.bottom());
        (right > left && bottom > top).then(|| PanelRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverGeometry {
    pub spec: CoverSpec,
    pub dpi: f64,
    pub spine_inches: f64,
    pub wrap_inches: f64,
    pub bleed_inches: f64,
    /// Spread width including wrap, excluding bleed.
    pub total_width_inches: f64,
    /// Spread height including wrap, excluding bleed.
    pub total_height_inches: f64,
    /// Full canvas including bleed.
    pub width_px: u32,
    pub height_px: u32,
    pub back: PanelRect,
    pub spine: PanelRect,
    pub front: PanelRect,
}

impl CoverGeometry {
    pub fn compute(spec: CoverSpec) -> Self {
        Self::compute_at(spec, COVER_DPI)
    }

    /// Same as [`CoverGeometry::compute`] at a custom resolution.
    pub fn compute_at(spec: CoverSpec, dpi: f64) -> Self {
        let (trim_w, trim_h) = spec.book_size.trim_inches();
        let spine_inches = spec.page_count as f64 * spec.paper_type.spine_inches_per_page();
        let wrap_inches = spec.cover_type.wrap_inches();
        let bleed_inches = COVER_BLEED_INCHES;

        let total_width_inches = 2.0 * trim_w + spine_inches + 2.0 * wrap_inches;
        let total_height_inches = trim_h + 2.0 * wrap_inches;

        let origin = (bleed_inches + wrap_inches) * dpi;
        let back = PanelRect {
            x: origin,
            y: origin,
            width: trim_w * dpi,
            height: trim_h * dpi,
        };
        let spine = PanelRect {
            x: back.right(),
            y: origin,
            width: spine_inches * dpi,
            height: trim_h * dpi,
        };
        let front = PanelRect {
            x: spine.right(),
            y: origin,
            width: trim_w * dpi,
            height: trim_h * dpi,
        };

        Self {
            spec,
            dpi,
            spine_inches,
            wrap_inches,
            bleed_inches,
            total_width_inches,
            total_height_inches,
            width_px: ((total_width_inches + 2.0 * bleed_inches) * dpi).round() as u32,
            height_px: ((total_height_inches + 2.0 * bleed_inches) * dpi).round() as u32,
            back,
            spine,
            front,
        }
    }

    /// Whether the spine is wide enough to carry text.
    pub fn spine_has_text(&self) -> bool {
        self.spine_inches > SPINE_TEXT_MIN_INCHES
    }

    /// The whole canvas, bleed included.
    pub fn canvas(&self) -> PanelRect {
        PanelRect {
            x: 0.0,
            y: 0.0,
            width: self.width_px as f64,
            height: self.height_px as f64,
        }
    }
}
