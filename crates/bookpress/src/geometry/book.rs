use serde::{Deserialize, Serialize};

/// Resolution of the page editor canvas (CSS pixels).
pub const EDITOR_DPI: f64 = 96.0;

/// Resolution used for print output and geometry checks.
pub const PRINT_DPI: f64 = 300.0;

/// Scale from editor units to print pixels.
pub const DEVICE_SCALE: f64 = PRINT_DPI / EDITOR_DPI;

/// Bleed beyond the trim edge on every side, in inches.
pub const BLEED_INCHES: f64 = 0.125;

/// Supported trim sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookSize {
    SmallSquare,
    LargeSquare,
    Portrait,
}

impl BookSize {
    pub const ALL: [BookSize; 3] = [
        BookSize::SmallSquare,
        BookSize::LargeSquare,
        BookSize::Portrait,
    ];

    /// Trim `(width, height)` in inches.
    pub fn trim_inches(self) -> (f64, f64) {
        match self {
            BookSize::SmallSquare => (8.0, 8.0),
            BookSize::LargeSquare => (12.0, 12.0),
            BookSize::Portrait => (8.5, 11.0),
        }
    }

    /// Inset from the trim edge inside which important content should stay.
    pub fn safety_margin_inches(self) -> f64 {
        match self {
            BookSize::SmallSquare => 0.2,
            BookSize::LargeSquare | BookSize::Portrait => 0.25,
        }
    }

    /// Editor canvas `(width, height)` in editor units.
    pub fn canvas_editor_units(self) -> (f64, f64) {
        let (w, h) = self.trim_inches();
        (w * EDITOR_DPI, h * EDITOR_DPI)
    }

    /// Stable identifier, also used in fingerprints and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            BookSize::SmallSquare => "small-square",
            BookSize::LargeSquare => "large-square",
            BookSize::Portrait => "portrait",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|size| size.as_str() == s)
    }

    /// Safety and full-bleed zones at print resolution.
    pub fn print_zones(self) -> PrintZones {
        let (w, h) = self.trim_inches();
        PrintZones {
            trim_width: w * PRINT_DPI,
            trim_height: h * PRINT_DPI,
            safety_margin: self.safety_margin_inches() * PRINT_DPI,
            bleed: BLEED_INCHES * PRINT_DPI,
        }
    }
}

impl std::fmt::Display for BookSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Print-resolution zones for one trim size, relative to the trim origin.
///
/// The safety rectangle is `[safety_margin, trim - safety_margin]` on each axis
/// and the full-bleed rectangle is `[-bleed, trim + bleed]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintZones {
    pub trim_width: f64,
    pub trim_height: f64,
    pub safety_margin: f64,
    pub bleed: f64,
}

impl PrintZones {
    /// Distance past the safety line beyond which content is critical.
    pub fn critical_threshold(&self) -> f64 {
        self.safety_margin / 2.0
    }
}
