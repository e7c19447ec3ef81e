pub mod assembler;
pub mod clock;
pub mod compile;
pub mod config;
pub mod cover;
pub mod db;
pub mod error;
pub mod fulfillment;
pub mod geometry;
pub mod page;
pub mod render;
pub mod secrets;
pub mod telemetry;

pub use assembler::{ArtifactAssembler, DownloadRef, FileObjectStore, ObjectStore, UrlSigner};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compile::{
    CompilationController, CompilationJob, CompileOutcome, CompileRequest, CompileSettings,
    JobRepository, JobStatus,
};
pub use config::{load_config, Config};
pub use cover::{CoverComposer, CoverDesign, CoverGeometry, CoverSpec, CoverType, PaperType};
pub use db::Database;
pub use error::{BookpressError, ConfigError, Result};
pub use fulfillment::{FulfillmentBridge, OrderStatus, PrintOrder, PrintProvider};
pub use geometry::{validate_pages, BleedValidationReport, BookSize};
pub use page::{ContentItem, ItemKind, Page};
pub use render::{PageRasterizer, PageSource, RenderTokenIssuer, RenderView, Snapshotter};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use telemetry::init_tracing;
