//! Builders for pages, manifests and order inputs.

#![allow(dead_code)]

use bookpress::cover::{CoverDesign, CoverMode};
use bookpress::fulfillment::ShippingAddress;
use bookpress::geometry::BookSize;
use bookpress::page::{ContentItem, ItemKind, Page};
use bookpress::render::BookManifest;

/// Builder for a single page in editor units.
pub struct PageBuilder {
    page: Page,
}

impl PageBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            page: Page {
                id: id.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn background_color(mut self, color: &str) -> Self {
        self.page.background_color = Some(color.to_string());
        self
    }

    pub fn item(mut self, id: &str, kind: ItemKind, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.page.items.push(ContentItem {
            id: id.to_string(),
            kind,
            x: Some(x),
            y: Some(y),
            width: Some(w),
            height: Some(h),
            ..Default::default()
        });
        self
    }

    pub fn photo(self, id: &str, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.item(id, ItemKind::Photo, x, y, w, h)
    }

    pub fn text(mut self, id: &str, x: f64, y: f64, w: f64, h: f64, text: &str) -> Self {
        self = self.item(id, ItemKind::Text, x, y, w, h);
        if let Some(item) = self.page.items.last_mut() {
            item.text = Some(text.to_string());
        }
        self
    }

    pub fn build(self) -> Page {
        self.page
    }
}

/// A page whose only photo sits well inside the safety zone.
pub fn clean_page(id: &str) -> Page {
    PageBuilder::new(id)
        .photo(&format!("{}-photo", id), 100.0, 100.0, 300.0, 200.0)
        .text(&format!("{}-caption", id), 100.0, 320.0, 300.0, 40.0, "Summer")
        .build()
}

/// A page with a photo pushed `overflow_px` print pixels past the left
/// safety line of `book_size`.
pub fn page_crossing_margin(id: &str, book_size: BookSize, overflow_px: f64) -> Page {
    let zones = book_size.print_zones();
    let x_print = zones.safety_margin - overflow_px;
    let x_editor = x_print / bookpress::geometry::DEVICE_SCALE;
    PageBuilder::new(id)
        .photo(&format!("{}-photo", id), x_editor, 200.0, 200.0, 200.0)
        .build()
}

pub fn manifest(family_id: &str, book_size: BookSize, pages: Vec<Page>) -> BookManifest {
    BookManifest {
        family_id: family_id.to_string(),
        book_size,
        family_name: Some("The Okafors".to_string()),
        title: Some("Our Year".to_string()),
        pages,
    }
}

pub fn clean_pages(count: usize) -> Vec<Page> {
    (1..=count).map(|i| clean_page(&format!("p{}", i))).collect()
}

pub fn page_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("p{}", i)).collect()
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        name: "Ada Okafor".to_string(),
        street1: "12 Harbour Rd".to_string(),
        street2: None,
        city: "Seattle".to_string(),
        state_code: Some("WA".to_string()),
        postcode: "98101".to_string(),
        country_code: "US".to_string(),
        phone_number: Some("+1 206 555 0100".to_string()),
        email: Some("ada@example.com".to_string()),
    }
}

pub fn solid_design() -> CoverDesign {
    CoverDesign {
        mode: CoverMode::Solid,
        primary_color: "#1f4e79".to_string(),
        secondary_color: "#f5f0e6".to_string(),
        family_name: "The Okafors".to_string(),
        title: Some("Our Year".to_string()),
        front_image: None,
        wrap_image: None,
    }
}
