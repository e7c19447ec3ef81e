//! Page rendering: render tokens, the render view and the snapshot-driven rasterizer.

pub mod rasterizer;
pub mod snapshot;
pub mod source;
pub mod token;
pub mod view;

pub use rasterizer::{
    default_bleed_px, page_viewport, PageRasterizer, RasterSettings, RasterizedPage, RenderError,
};
pub use snapshot::{HttpSnapshotter, SnapshotError, SnapshotRequest, Snapshotter, Viewport};
pub use source::{BookManifest, InMemoryPageSource, PageSource, SourceError};
pub use token::{RenderSubject, RenderTokenIssuer, TokenError};
pub use view::{PageViewParams, RenderView, RenderedView, ViewError, READY_SELECTOR};
