//! Local price table used when the provider cannot quote.

use serde::{Deserialize, Serialize};

use crate::cover::{CoverType, PaperType};
use crate::geometry::BookSize;

use super::order::ShippingLevel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub printing_cents: u64,
    pub shipping_cents: u64,
    pub total_cents: u64,
    pub currency: String,
    /// True when the figures come from the local table rather than the provider.
    pub is_estimate: bool,
}

/// Everything a quote depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub book_size: BookSize,
    pub page_count: u32,
    #[serde(default)]
    pub cover_type: CoverType,
    #[serde(default)]
    pub paper_type: PaperType,
    pub quantity: u32,
    #[serde(default)]
    pub shipping_level: ShippingLevel,
    pub country_code: String,
}

/// Fallback prices, in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceTable {
    pub currency: String,
    pub small_square_base: u64,
    pub large_square_base: u64,
    pub portrait_base: u64,
    pub per_page: u64,
    pub hardcover_surcharge: u64,
    pub shipping_mail: u64,
    pub shipping_priority: u64,
    pub shipping_ground: u64,
    pub shipping_expedited: u64,
    pub shipping_express: u64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            small_square_base: 1999,
            large_square_base: 3499,
            portrait_base: 2499,
            per_page: 35,
            hardcover_surcharge: 1000,
            shipping_mail: 499,
            shipping_priority: 899,
            shipping_ground: 799,
            shipping_expedited: 1499,
            shipping_express: 2499,
        }
    }
}

impl PriceTable {
    pub fn base(&self, book_size: BookSize) -> u64 {
        match book_size {
            BookSize::SmallSquare => self.small_square_base,
            BookSize::LargeSquare => self.large_square_base,
            BookSize::Portrait => self.portrait_base,
        }
    }

    pub fn shipping(&self, level: ShippingLevel) -> u64 {
        match level {
            ShippingLevel::Mail => self.shipping_mail,
            ShippingLevel::Priority => self.shipping_priority,
            ShippingLevel::Ground => self.shipping_ground,
            ShippingLevel::Expedited => self.shipping_expedited,
            ShippingLevel::Express => self.shipping_express,
        }
    }

    /// Deterministic estimate; quantity scales printing but not shipping.
    pub fn estimate(&self, request: &QuoteRequest) -> CostBreakdown {
        let surcharge = match request.cover_type {
            CoverType::Soft => 0,
            CoverType::Hard => self.hardcover_surcharge,
        };
        let per_copy =
            self.base(request.book_size) + self.per_page * request.page_count as u64 + surcharge;
        let printing_cents = per_copy * request.quantity.max(1) as u64;
        let shipping_cents = self.shipping(request.shipping_level);

        CostBreakdown {
            printing_cents,
            shipping_cents,
            total_cents: printing_cents + shipping_cents,
            currency: self.currency.clone(),
            is_estimate: true,
        }
    }
}
