//! Print safety checks for page content.
//!
//! Everything here is pure: the same pages and book size always produce the
//! same report.

use crate::page::{ContentItem, ItemKind, Page};

use super::book::{BookSize, PrintZones, DEVICE_SCALE};
use super::report::{BleedValidationReport, Edge, ItemWarning, PageWarning, Severity};

/// Crossings smaller than this (print pixels) are rounding noise from the
/// editor-to-print scale and count as touching the line.
const TOLERANCE_PX: f64 = 1e-6;

/// Axis-aligned box in some coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Bounds {
    /// Bounding box of an item rotated about its centre.
    pub fn of_rotated(x: f64, y: f64, width: f64, height: f64, rotation_deg: f64) -> Self {
        if rotation_deg % 360.0 == 0.0 {
            return Self {
                left: x,
                top: y,
                right: x + width,
                bottom: y + height,
            };
        }
        let theta = rotation_deg.to_radians();
        let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
        let half_w = (width * cos + height * sin) / 2.0;
        let half_h = (width * sin + height * cos) / 2.0;
        let cx = x + width / 2.0;
        let cy = y + height / 2.0;
        Self {
            left: cx - half_w,
            top: cy - half_h,
            right: cx + half_w,
            bottom: cy + half_h,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            left: self.left * factor,
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
        }
    }

    /// True when the box does not overlap `[0, width] x [0, height]` at all.
    pub fn is_outside(&self, width: f64, height: f64) -> bool {
        self.right <= 0.0 || self.bottom <= 0.0 || self.left >= width || self.top >= height
    }
}

/// Validates every page against the zones of `book_size`.
pub fn validate_pages(pages: &[Page], book_size: BookSize) -> BleedValidationReport {
    let zones = book_size.print_zones();
    let page_results = pages.iter().map(|p| validate_page(p, &zones)).collect();
    BleedValidationReport::from_pages(book_size, page_results)
}

/// Validates a single page. Always returns an entry, even with no warnings.
pub fn validate_page(page: &Page, zones: &PrintZones) -> PageWarning {
    let warnings = page
        .items
        .iter()
        .flat_map(|item| check_item(item, zones))
        .collect();

    PageWarning {
        page_id: page.id.clone(),
        title: page.title.clone(),
        warnings,
    }
}

/// Checks one item. Unplaced items and items entirely off the canvas yield nothing.
pub fn check_item(item: &ContentItem, zones: &PrintZones) -> Vec<ItemWarning> {
    let Some((x, y, w, h)) = item.placement() else {
        return Vec::new();
    };

    let canvas_w = zones.trim_width / DEVICE_SCALE;
    let canvas_h = zones.trim_height / DEVICE_SCALE;
    let editor_bounds = Bounds::of_rotated(x, y, w, h, item.rotation);
    if editor_bounds.is_outside(canvas_w, canvas_h) {
        return Vec::new();
    }

    let bounds = editor_bounds.scaled(DEVICE_SCALE);

    if item.kind == ItemKind::Background {
        return check_background(item, &bounds, zones);
    }

    let safe_right = zones.trim_width - zones.safety_margin;
    let safe_bottom = zones.trim_height - zones.safety_margin;
    let crossings = [
        (Edge::Left, zones.safety_margin - bounds.left),
        (Edge::Top, zones.safety_margin - bounds.top),
        (Edge::Right, bounds.right - safe_right),
        (Edge::Bottom, bounds.bottom - safe_bottom),
    ];

    crossings
        .into_iter()
        .filter(|(_, distance)| *distance > TOLERANCE_PX)
        .map(|(edge, distance)| {
            let severity = if distance > zones.critical_threshold() + TOLERANCE_PX {
                Severity::Critical
            } else {
                Severity::Warning
            };
            ItemWarning {
                item_id: item.id.clone(),
                edge,
                severity,
                distance_px: distance,
                message: item_message(item.kind, edge, severity, distance),
            }
        })
        .collect()
}

/// Backgrounds may run into the bleed. Only flag edges that reach the trim
/// line but stop short of the bleed line, which leaves a sliver after trimming.
fn check_background(item: &ContentItem, bounds: &Bounds, zones: &PrintZones) -> Vec<ItemWarning> {
    let shortfalls = [
        (Edge::Left, bounds.left <= TOLERANCE_PX, bounds.left + zones.bleed),
        (Edge::Top, bounds.top <= TOLERANCE_PX, bounds.top + zones.bleed),
        (
            Edge::Right,
            bounds.right >= zones.trim_width - TOLERANCE_PX,
            zones.trim_width + zones.bleed - bounds.right,
        ),
        (
            Edge::Bottom,
            bounds.bottom >= zones.trim_height - TOLERANCE_PX,
            zones.trim_height + zones.bleed - bounds.bottom,
        ),
    ];

    shortfalls
        .into_iter()
        .filter(|(_, touches_trim, shortfall)| *touches_trim && *shortfall > TOLERANCE_PX)
        .map(|(edge, _, shortfall)| ItemWarning {
            item_id: item.id.clone(),
            edge,
            severity: Severity::Info,
            distance_px: shortfall,
            message: format!(
                "Background stops {:.0}px short of the {} bleed edge; a thin white line may remain after trimming",
                shortfall, edge
            ),
        })
        .collect()
}

fn kind_label(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Photo => "Photo",
        ItemKind::Text => "Text",
        ItemKind::Sticker => "Sticker",
        ItemKind::Shape => "Shape",
        ItemKind::Background => "Background",
    }
}

fn item_message(kind: ItemKind, edge: Edge, severity: Severity, distance: f64) -> String {
    match severity {
        Severity::Critical => format!(
            "{} extends {:.0}px past the {} safety line and will likely be cut off",
            kind_label(kind),
            distance,
            edge
        ),
        _ => format!(
            "{} is {:.0}px into the {} safety margin",
            kind_label(kind),
            distance,
            edge
        ),
    }
}
