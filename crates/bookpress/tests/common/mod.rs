//! Shared test utilities for bookpress integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring the compile and fulfillment stack over fakes
//! - Fakes for the snapshot service and the print provider
//! - Builders for pages, manifests and order inputs

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::*;
