//! Print geometry: trim sizes, safety zones and bleed validation.

pub mod book;
pub mod report;
pub mod validator;

pub use book::{BookSize, PrintZones, BLEED_INCHES, DEVICE_SCALE, EDITOR_DPI, PRINT_DPI};
pub use report::{
    Acknowledgement, BleedValidationReport, Edge, ItemWarning, PageWarning, Severity,
    ValidationSummary,
};
pub use validator::{check_item, validate_page, validate_pages, Bounds};
