//! Stock Ledger Accessor.
//!
//! Availability is checked and reserved in one atomic storage operation so
//! two callers racing for the last unit cannot both succeed. The ledger
//! itself holds no lock across await points; the guard lives in the store.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Product, ResolvedUnit};
use crate::error::Result;
use crate::store::StockStore;

/// Transient result of one availability check. Never persisted.
#[derive(Clone, Copy, Debug)]
pub struct ReservationOutcome {
    /// The requested quantity fits within available stock.
    pub available: bool,
    /// What the caller could still obtain, counting units they already hold.
    pub available_stock: u32,
    /// Backorder policy permits proceeding despite zero available stock.
    pub can_backorder: bool,
}

fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, i64::from(u32::MAX)) as u32
}

/// Check-only availability against a catalog snapshot. Used by the cart
/// validator, whose lines already hold `held` reserved units; no store
/// round-trip and no counter movement.
pub fn availability(
    product: &Product,
    unit: &ResolvedUnit,
    requested: u32,
    held: u32,
) -> ReservationOutcome {
    if !product.track_inventory {
        return ReservationOutcome {
            available: true,
            available_stock: clamp_u32(unit.stock),
            can_backorder: false,
        };
    }
    let avail = unit.available + i64::from(held);
    ReservationOutcome {
        available: avail >= i64::from(requested),
        available_stock: clamp_u32(avail),
        can_backorder: product.allow_backorder && avail <= 0,
    }
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }

    /// Moves the caller's reservation on `unit` from `held` to `target`
    /// units, atomically guarded at the store.
    ///
    /// On a shortfall nothing is taken and the outcome reports the stock the
    /// caller could still obtain. A reduction (`target < held`) releases the
    /// surplus and always succeeds.
    pub async fn check_and_reserve(
        &self,
        product: &Product,
        unit: &ResolvedUnit,
        target: u32,
        held: u32,
    ) -> Result<ReservationOutcome> {
        if target <= held {
            // The caller already holds at least the target; a reduction
            // cannot fail, even if catalog stock dropped underneath the
            // reservation (the validator repairs that on the next read).
            if target < held {
                self.store
                    .release(product.id, &unit.option_ids, held - target)
                    .await?;
            }
            return Ok(ReservationOutcome {
                available: true,
                available_stock: clamp_u32(unit.available + i64::from(held)),
                can_backorder: false,
            });
        }

        let delta = target - held;
        let res = self
            .store
            .try_reserve(product.id, &unit.option_ids, delta, held)
            .await?;

        let available_stock = if product.track_inventory {
            clamp_u32(res.available + i64::from(held))
        } else {
            clamp_u32(res.available)
        };

        Ok(ReservationOutcome {
            available: res.reserved && !res.backordered,
            available_stock,
            can_backorder: res.backordered,
        })
    }

    pub async fn release(&self, product_id: Uuid, option_ids: &[Uuid], qty: u32) -> Result<()> {
        if qty == 0 {
            return Ok(());
        }
        self.store.release(product_id, option_ids, qty).await
    }
}
