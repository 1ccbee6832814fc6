//! In-memory store backing the integration tests and local development.
//!
//! One mutex over the whole state makes every operation atomic, which is
//! exactly the guard discipline the Postgres store provides with conditional
//! updates. The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Cart, Money, Product, ProductStatus};
use crate::error::{CartError, Result};
use crate::store::{CartStore, ProductCatalog, StockReservation, StockStore};

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    batch_lookups: AtomicUsize,
    single_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CartError::Persistence("store lock poisoned".into()))
    }

    pub fn insert_product(&self, product: Product) {
        if let Ok(mut inner) = self.lock() {
            inner.products.insert(product.id, product);
        }
    }

    pub fn remove_product(&self, product_id: Uuid) {
        if let Ok(mut inner) = self.lock() {
            inner.products.remove(&product_id);
        }
    }

    /// Overwrites the flat stock counter, simulating an external catalog
    /// mutation. Reservations are left untouched.
    pub fn set_stock(&self, product_id: Uuid, stock: i64) {
        if let Ok(mut inner) = self.lock() {
            if let Some(p) = inner.products.get_mut(&product_id) {
                p.stock = stock;
            }
        }
    }

    pub fn set_option_stock(&self, product_id: Uuid, option_id: Uuid, stock: i64) {
        if let Ok(mut inner) = self.lock() {
            if let Some(p) = inner.products.get_mut(&product_id) {
                for variant in &mut p.variants {
                    for option in &mut variant.options {
                        if option.id == option_id {
                            option.stock = stock;
                        }
                    }
                }
            }
        }
    }

    pub fn set_price(&self, product_id: Uuid, price: Money) {
        if let Ok(mut inner) = self.lock() {
            if let Some(p) = inner.products.get_mut(&product_id) {
                p.price = price;
            }
        }
    }

    pub fn set_status(&self, product_id: Uuid, status: ProductStatus) {
        if let Ok(mut inner) = self.lock() {
            if let Some(p) = inner.products.get_mut(&product_id) {
                p.status = status;
            }
        }
    }

    pub fn flat_reserved(&self, product_id: Uuid) -> i64 {
        self.lock()
            .ok()
            .and_then(|inner| inner.products.get(&product_id).map(|p| p.reserved))
            .unwrap_or(0)
    }

    pub fn batch_lookup_count(&self) -> usize {
        self.batch_lookups.load(Ordering::SeqCst)
    }

    pub fn single_lookup_count(&self) -> usize {
        self.single_lookups.load(Ordering::SeqCst)
    }

    pub fn reset_lookup_counts(&self) {
        self.batch_lookups.store(0, Ordering::SeqCst);
        self.single_lookups.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        self.single_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock()?.products.get(&id).cloned())
    }

    async fn find_many_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>> {
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.products.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn try_reserve(
        &self,
        product_id: Uuid,
        option_ids: &[Uuid],
        delta: u32,
        held: u32,
    ) -> Result<StockReservation> {
        let mut inner = self.lock()?;
        let product = inner
            .products
            .get_mut(&product_id)
            .ok_or(CartError::ProductNotFound)?;
        let tracked = product.track_inventory;
        let backorder_ok = product.allow_backorder;

        let (raw, avail) = if option_ids.is_empty() {
            (product.stock, product.stock - product.reserved)
        } else {
            let mut raw = i64::MAX;
            let mut avail = i64::MAX;
            for id in option_ids {
                let option = product
                    .variants
                    .iter()
                    .flat_map(|v| v.options.iter())
                    .find(|o| o.id == *id)
                    .ok_or(CartError::ProductNotFound)?;
                raw = raw.min(option.stock);
                avail = avail.min(option.stock - option.reserved);
            }
            (raw, avail)
        };

        let (take, backordered) = if !tracked {
            (true, false)
        } else if avail >= i64::from(delta) {
            (true, false)
        } else if backorder_ok && avail + i64::from(held) <= 0 {
            (true, true)
        } else {
            (false, false)
        };

        if take {
            if option_ids.is_empty() {
                product.reserved += i64::from(delta);
            } else {
                for id in option_ids {
                    for variant in &mut product.variants {
                        for option in &mut variant.options {
                            if option.id == *id {
                                option.reserved += i64::from(delta);
                            }
                        }
                    }
                }
            }
        }

        Ok(StockReservation {
            reserved: take,
            available: if tracked { avail } else { raw },
            backordered,
        })
    }

    async fn release(&self, product_id: Uuid, option_ids: &[Uuid], qty: u32) -> Result<()> {
        let mut inner = self.lock()?;
        let Some(product) = inner.products.get_mut(&product_id) else {
            return Ok(());
        };
        if option_ids.is_empty() {
            product.reserved = (product.reserved - i64::from(qty)).max(0);
        } else {
            for id in option_ids {
                for variant in &mut product.variants {
                    for option in &mut variant.options {
                        if option.id == *id {
                            option.reserved = (option.reserved - i64::from(qty)).max(0);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>> {
        Ok(self.lock()?.carts.get(&user_id).cloned())
    }

    async fn get_or_create(&self, user_id: Uuid) -> Result<Cart> {
        let mut inner = self.lock()?;
        Ok(inner
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::new(user_id))
            .clone())
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.lock()?.carts.insert(cart.user_id(), cart.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Money;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn flat_product(stock: i64, backorder: bool) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Mug".into(),
            slug: "mug".into(),
            description: None,
            price: Money::usd(Decimal::new(500, 2)),
            status: ProductStatus::Active,
            track_inventory: true,
            allow_backorder: backorder,
            stock,
            reserved: 0,
            variants: vec![],
            images: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reserve_guard_rejects_partial_shortfall() {
        let store = MemoryStore::new();
        let p = flat_product(3, true);
        let pid = p.id;
        store.insert_product(p);

        // 2 of 3 taken, then 2 more requested: stock is not zero, so
        // backorder must not fill the gap.
        let first = store.try_reserve(pid, &[], 2, 0).await.unwrap();
        assert!(first.reserved);
        let second = store.try_reserve(pid, &[], 2, 0).await.unwrap();
        assert!(!second.reserved);
        assert_eq!(second.available, 1);
    }

    #[tokio::test]
    async fn test_backorder_fills_zero_stock_gap() {
        let store = MemoryStore::new();
        let p = flat_product(0, true);
        let pid = p.id;
        store.insert_product(p);

        let res = store.try_reserve(pid, &[], 2, 0).await.unwrap();
        assert!(res.reserved);
        assert!(res.backordered);
    }

    #[tokio::test]
    async fn test_release_saturates_at_zero() {
        let store = MemoryStore::new();
        let p = flat_product(5, false);
        let pid = p.id;
        store.insert_product(p);

        store.try_reserve(pid, &[], 2, 0).await.unwrap();
        store.release(pid, &[], 10).await.unwrap();
        assert_eq!(store.flat_reserved(pid), 0);
    }

    #[tokio::test]
    async fn test_get_or_create_keeps_existing_expiry() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = store.get_or_create(user).await.unwrap();
        let second = store.get_or_create(user).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.expires_at(), second.expires_at());
    }
}
