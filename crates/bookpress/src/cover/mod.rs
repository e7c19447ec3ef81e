//! Cover geometry, design layout and rasterization.

pub mod composer;
pub mod geometry;
pub mod layout;
pub mod view;

pub use composer::{CoverArt, CoverComposer, CoverError};
pub use geometry::{
    CoverGeometry, CoverSpec, CoverType, PanelRect, PaperType, COVER_BLEED_INCHES, COVER_DPI,
    HARDCOVER_WRAP_INCHES, SPINE_TEXT_MIN_INCHES,
};
pub use layout::{compose_layout, CoverDesign, CoverElement, CoverLayout, CoverMode, DesignError};
pub use view::{render_cover, CoverRenderParams, CoverViewParams};
