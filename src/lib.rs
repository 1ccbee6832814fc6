//! Cartledger
//!
//! Cart and inventory reservation engine for a self-hosted storefront.
//!
//! ## Features
//! - Variant-keyed stock model (per-option counters, price deltas)
//! - Atomic check-and-reserve against persisted stock, no oversell
//! - Deterministic merge of equivalent variant selections
//! - Read-time cart validation with clamp/remove auto-repair
//! - Checkout-ready summaries with a coupon hook

pub mod domain;
pub mod error;
pub mod services;
pub mod store;

pub use domain::{Cart, CartWarning, LineItem, Money, Product, SelectedOption};
pub use error::{CartError, Result};
pub use services::{CartService, CartSummary, NoCoupons, ValidatedCart};
