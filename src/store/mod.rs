//! Persistence seams for the cart engine.
//!
//! Every collaborator is a trait object injected into the services so tests
//! can substitute in-memory fakes per-case. The oversell guard lives behind
//! [`StockStore::try_reserve`]: implementations must make the check and the
//! reservation a single atomic step against the persisted counters.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Cart, Product};
use crate::error::Result;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Read access to the product catalog. Batch lookup is required: cart
/// validation and summarization load all referenced products in one call.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>>;
    async fn find_many_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>>;
}

/// Result of one atomic reserve attempt.
#[derive(Clone, Copy, Debug)]
pub struct StockReservation {
    /// Whether the reservation was taken (including backorder fills).
    pub reserved: bool,
    /// `stock - reserved` observed before this attempt, minimum across the
    /// targeted units. Mirrors the raw counter for untracked products.
    pub available: i64,
    /// The reservation was taken only because backorder policy filled a
    /// zero-stock gap.
    pub backordered: bool,
}

/// Reservation counters for stock-bearing units.
///
/// A unit is the product's flat counter when `option_ids` is empty,
/// otherwise each listed variant option. `try_reserve` adds `delta` to every
/// targeted unit's `reserved` counter iff the guard passes on all of them:
///
/// - untracked product: no guard, bookkeeping still runs;
/// - `stock - reserved >= delta`; or
/// - backorder allowed and `stock - reserved + held <= 0`, where `held` is
///   what the caller already has reserved on the same units.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn try_reserve(
        &self,
        product_id: Uuid,
        option_ids: &[Uuid],
        delta: u32,
        held: u32,
    ) -> Result<StockReservation>;

    /// Returns previously reserved units to availability. Counters never go
    /// below zero; unknown units are ignored (the product may have been
    /// deleted since the reservation was taken).
    async fn release(&self, product_id: Uuid, option_ids: &[Uuid], qty: u32) -> Result<()>;
}

/// Cart persistence: one cart per user, created lazily.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>>;

    /// Atomic upsert-with-default, not check-then-create. Must not extend an
    /// existing cart's expiry.
    async fn get_or_create(&self, user_id: Uuid) -> Result<Cart>;

    /// Persists the cart's line items and expiry. Concurrent saves of the
    /// same cart resolve last-write-wins.
    async fn save(&self, cart: &Cart) -> Result<()>;
}
