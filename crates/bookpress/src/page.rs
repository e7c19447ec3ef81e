//! Scrapbook page content model as stored by the editor.
//!
//! Positions and sizes are in editor units (CSS pixels at 96 DPI), relative
//! to the top-left corner of the trimmed page.

use serde::{Deserialize, Serialize};

/// Kind of content placed on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Photo,
    Text,
    Sticker,
    Shape,
    /// Full-page artwork that is expected to run into the bleed zone.
    Background,
}

/// A single positioned item on a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    /// Clockwise rotation in degrees about the item's centre.
    #[serde(default)]
    pub rotation: f64,
    /// Image source for photo, sticker and background items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ContentItem {
    /// Returns the item's box as `(x, y, width, height)` if it is fully placed.
    pub fn placement(&self) -> Option<(f64, f64, f64, f64)> {
        match (self.x, self.y, self.width, self.height) {
            (Some(x), Some(y), Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((x, y, w, h)),
            _ => None,
        }
    }
}

/// One scrapbook page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default)]
    pub items: Vec<ContentItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_requires_all_fields() {
        let mut item = ContentItem {
            id: "a".to_string(),
            x: Some(1.0),
            y: Some(2.0),
            width: Some(10.0),
            ..Default::default()
        };
        assert!(item.placement().is_none());

        item.height = Some(5.0);
        assert_eq!(item.placement(), Some((1.0, 2.0, 10.0, 5.0)));
    }

    #[test]
    fn test_zero_sized_item_has_no_placement() {
        let item = ContentItem {
            id: "z".to_string(),
            x: Some(0.0),
            y: Some(0.0),
            width: Some(0.0),
            height: Some(20.0),
            ..Default::default()
        };
        assert!(item.placement().is_none());
    }

    #[test]
    fn test_page_deserializes_camel_case() {
        let json = r##"{
            "id": "p1",
            "title": "Summer",
            "backgroundColor": "#ffffff",
            "items": [{"id": "i1", "kind": "background", "x": 0, "y": 0, "width": 768, "height": 768}]
        }"##;
        let page: Page = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].kind, ItemKind::Background);
        assert_eq!(page.background_color.as_deref(), Some("#ffffff"));
    }
}
