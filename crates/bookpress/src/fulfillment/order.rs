//! Print orders and their lifecycle.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cover::{CoverDesign, CoverType, PaperType};
use crate::geometry::BookSize;

use super::pricing::CostBreakdown;

static RE_COUNTRY_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{2}$").unwrap());

/// `pending -> submitted -> processing -> printing -> shipped -> delivered`.
/// Failed and cancelled are reachable from any state before shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Processing,
    Printing,
    Shipped,
    Delivered,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Submitted,
        OrderStatus::Processing,
        OrderStatus::Printing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    /// Position along the forward path; `None` for failed and cancelled.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Submitted => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Printing => Some(3),
            OrderStatus::Shipped => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Failed | OrderStatus::Cancelled => None,
        }
    }

    /// Forward moves may skip states the provider never reported.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(from), None) => from < 4,
            (None, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Processing => "processing",
            OrderStatus::Printing => "printing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Maps a provider status string onto the order lifecycle.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" | "accepted" | "unpaid" | "payment_in_progress" | "submitted" => {
                Some(OrderStatus::Submitted)
            }
            "production_ready" | "production_delayed" | "processing" => {
                Some(OrderStatus::Processing)
            }
            "in_production" | "printing" => Some(OrderStatus::Printing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "rejected" | "error" | "failed" => Some(OrderStatus::Failed),
            "canceled" | "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingLevel {
    Mail,
    Priority,
    #[default]
    Ground,
    Expedited,
    Express,
}

impl ShippingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ShippingLevel::Mail => "mail",
            ShippingLevel::Priority => "priority",
            ShippingLevel::Ground => "ground",
            ShippingLevel::Expedited => "expedited",
            ShippingLevel::Express => "express",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ShippingLevel::Mail,
            ShippingLevel::Priority,
            ShippingLevel::Ground,
            ShippingLevel::Expedited,
            ShippingLevel::Express,
        ]
        .into_iter()
        .find(|level| level.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: String,
    pub street1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    pub postcode: String,
    /// ISO 3166-1 alpha-2.
    pub country_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Shipping address is missing {0}")]
    Missing(&'static str),

    #[error("'{0}' is not a two-letter country code")]
    InvalidCountry(String),
}

impl ShippingAddress {
    pub fn validate(&self) -> Result<(), AddressError> {
        for (field, value) in [
            ("name", &self.name),
            ("street", &self.street1),
            ("city", &self.city),
            ("postcode", &self.postcode),
            ("country code", &self.country_code),
        ] {
            if value.trim().is_empty() {
                return Err(AddressError::Missing(field));
            }
        }
        if !RE_COUNTRY_CODE.is_match(&self.country_code) {
            return Err(AddressError::InvalidCountry(self.country_code.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Order {order_id} cannot move from {from} to {to}")]
pub struct InvalidOrderTransition {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOrder {
    pub id: String,
    pub family_id: String,
    pub job_id: String,
    pub book_size: BookSize,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub page_count: u32,
    pub quantity: u32,
    pub shipping_address: ShippingAddress,
    pub shipping_level: ShippingLevel,
    pub cover_design: CoverDesign,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrintOrder {
    pub fn transition(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidOrderTransition> {
        if next == self.status {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(InvalidOrderTransition {
                order_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
