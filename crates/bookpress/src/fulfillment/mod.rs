//! Print fulfillment: pricing, provider submission and order tracking.

pub mod bridge;
pub mod order;
pub mod pricing;
pub mod provider;
pub mod repository;

pub use bridge::{FulfillmentBridge, FulfillmentError, FulfillmentSettings, PlaceOrderRequest};
pub use order::{
    AddressError, InvalidOrderTransition, OrderStatus, PrintOrder, ShippingAddress, ShippingLevel,
};
pub use pricing::{CostBreakdown, PriceTable, QuoteRequest};
pub use provider::{HttpPrintProvider, PrintProvider, PrintSubmission, ProviderError, ProviderReceipt};
pub use repository::{InMemoryOrderRepository, OrderRepository, SqliteOrderRepository};
