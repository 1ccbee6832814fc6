//! Postgres-backed store.
//!
//! The oversell guard is a conditional `UPDATE` on the reservation counter:
//! the check and the increment happen in one statement (flat products) or
//! under `SELECT .. FOR UPDATE` row locks (variant options), so two callers
//! racing for the last unit cannot both pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Cart, LineItem, Money, Product, ProductStatus, SelectedOption, Variant, VariantOption,
};
use crate::error::{CartError, Result};
use crate::store::{CartStore, ProductCatalog, StockReservation, StockStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    slug: String,
    description: Option<String>,
    price: Decimal,
    currency: String,
    status: String,
    track_inventory: bool,
    allow_backorder: bool,
    stock: i64,
    reserved: i64,
    images: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: Uuid,
    variant_id: Uuid,
    value: String,
    price_delta: Decimal,
    stock: i64,
    reserved: i64,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: Uuid,
    product_id: Uuid,
    selection: serde_json::Value,
    quantity: i32,
    price: Decimal,
    currency: String,
}

fn parse_status(status: &str) -> ProductStatus {
    match status {
        "active" => ProductStatus::Active,
        "archived" => ProductStatus::Archived,
        _ => ProductStatus::Draft,
    }
}

impl PgStore {
    async fn load_products(&self, ids: &[Uuid]) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let product_rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, slug, description, price, currency, status, track_inventory, \
             allow_backorder, stock, reserved, images, created_at, updated_at \
             FROM products WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let variant_rows = sqlx::query_as::<_, VariantRow>(
            "SELECT id, product_id, name FROM product_variants \
             WHERE product_id = ANY($1) ORDER BY position",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let variant_ids: Vec<Uuid> = variant_rows.iter().map(|v| v.id).collect();
        let option_rows = if variant_ids.is_empty() {
            vec![]
        } else {
            sqlx::query_as::<_, OptionRow>(
                "SELECT id, variant_id, value, price_delta, stock, reserved \
                 FROM variant_options WHERE variant_id = ANY($1) ORDER BY position",
            )
            .bind(&variant_ids)
            .fetch_all(&self.pool)
            .await?
        };

        let products = product_rows
            .into_iter()
            .map(|row| {
                let variants = variant_rows
                    .iter()
                    .filter(|v| v.product_id == row.id)
                    .map(|v| Variant {
                        id: v.id,
                        name: v.name.clone(),
                        options: option_rows
                            .iter()
                            .filter(|o| o.variant_id == v.id)
                            .map(|o| VariantOption {
                                id: o.id,
                                value: o.value.clone(),
                                price_delta: o.price_delta,
                                stock: o.stock,
                                reserved: o.reserved,
                            })
                            .collect(),
                    })
                    .collect();

                Product {
                    id: row.id,
                    name: row.name,
                    slug: row.slug,
                    description: row.description,
                    price: Money::new(row.price, &row.currency),
                    status: parse_status(&row.status),
                    track_inventory: row.track_inventory,
                    allow_backorder: row.allow_backorder,
                    stock: row.stock,
                    reserved: row.reserved,
                    variants,
                    images: row.images,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                }
            })
            .collect();

        Ok(products)
    }

    async fn load_items(&self, cart_id: Uuid) -> Result<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT id, product_id, selection, quantity, price, currency \
             FROM cart_items WHERE cart_id = $1 ORDER BY position",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let selection: Vec<SelectedOption> = serde_json::from_value(row.selection)
                    .map_err(|e| CartError::Persistence(e.to_string()))?;
                Ok(LineItem {
                    id: row.id,
                    product_id: row.product_id,
                    selection,
                    quantity: row.quantity.max(0) as u32,
                    price: Money::new(row.price, &row.currency),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.load_products(&[id]).await?.into_iter().next())
    }

    async fn find_many_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Product>> {
        self.load_products(ids).await
    }
}

#[async_trait]
impl StockStore for PgStore {
    async fn try_reserve(
        &self,
        product_id: Uuid,
        option_ids: &[Uuid],
        delta: u32,
        held: u32,
    ) -> Result<StockReservation> {
        if option_ids.is_empty() {
            return self.reserve_flat(product_id, delta, held).await;
        }
        self.reserve_options(product_id, option_ids, delta, held)
            .await
    }

    async fn release(&self, product_id: Uuid, option_ids: &[Uuid], qty: u32) -> Result<()> {
        if option_ids.is_empty() {
            sqlx::query(
                "UPDATE products SET reserved = GREATEST(reserved - $2, 0), updated_at = now() \
                 WHERE id = $1",
            )
            .bind(product_id)
            .bind(i64::from(qty))
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE variant_options SET reserved = GREATEST(reserved - $2, 0) \
                 WHERE id = ANY($1)",
            )
            .bind(option_ids)
            .bind(i64::from(qty))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

impl PgStore {
    async fn reserve_flat(
        &self,
        product_id: Uuid,
        delta: u32,
        held: u32,
    ) -> Result<StockReservation> {
        // Single conditional update: the pre-read stock value is the guard.
        let updated = sqlx::query_as::<_, (bool, i64, i64)>(
            "UPDATE products \
             SET reserved = reserved + $2, updated_at = now() \
             WHERE id = $1 \
               AND (NOT track_inventory \
                    OR stock - reserved >= $2 \
                    OR (allow_backorder AND stock - reserved + $3 <= 0)) \
             RETURNING track_inventory, stock, reserved",
        )
        .bind(product_id)
        .bind(i64::from(delta))
        .bind(i64::from(held))
        .fetch_optional(&self.pool)
        .await?;

        if let Some((tracked, stock, reserved_after)) = updated {
            let avail_before = stock - (reserved_after - i64::from(delta));
            return Ok(StockReservation {
                reserved: true,
                available: if tracked { avail_before } else { stock },
                backordered: tracked && avail_before < i64::from(delta),
            });
        }

        let current = sqlx::query_as::<_, (bool, i64, i64)>(
            "SELECT track_inventory, stock, reserved FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CartError::ProductNotFound)?;

        let (tracked, stock, reserved) = current;
        Ok(StockReservation {
            reserved: false,
            available: if tracked { stock - reserved } else { stock },
            backordered: false,
        })
    }

    async fn reserve_options(
        &self,
        product_id: Uuid,
        option_ids: &[Uuid],
        delta: u32,
        held: u32,
    ) -> Result<StockReservation> {
        let mut tx = self.pool.begin().await?;

        let (tracked, backorder_ok) = sqlx::query_as::<_, (bool, bool)>(
            "SELECT track_inventory, allow_backorder FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CartError::ProductNotFound)?;

        let rows = sqlx::query_as::<_, (Uuid, i64, i64)>(
            "SELECT id, stock, reserved FROM variant_options \
             WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(option_ids)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() != option_ids.len() {
            return Err(CartError::ProductNotFound);
        }

        let raw = rows.iter().map(|(_, stock, _)| *stock).min().unwrap_or(0);
        let avail = rows
            .iter()
            .map(|(_, stock, reserved)| stock - reserved)
            .min()
            .unwrap_or(0);

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
            sqlx::query("UPDATE variant_options SET reserved = reserved + $2 WHERE id = ANY($1)")
                .bind(option_ids)
                .bind(i64::from(delta))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(StockReservation {
            reserved: take,
            available: if tracked { avail } else { raw },
            backordered,
        })
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT id, user_id, expires_at, created_at, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, user_id, expires_at, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let items = self.load_items(id).await?;
        Ok(Some(Cart::from_parts(
            id, user_id, items, expires_at, created_at, updated_at,
        )))
    }

    async fn get_or_create(&self, user_id: Uuid) -> Result<Cart> {
        let fresh = Cart::new(user_id);
        // Upsert-with-default; the no-op DO UPDATE makes RETURNING yield the
        // existing row without touching its expiry.
        let (id, user_id, expires_at, created_at, updated_at) =
            sqlx::query_as::<_, (Uuid, Uuid, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)>(
                "INSERT INTO carts (id, user_id, expires_at, created_at, updated_at) \
                 VALUES ($1, $2, $3, now(), now()) \
                 ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
                 RETURNING id, user_id, expires_at, created_at, updated_at",
            )
            .bind(fresh.id())
            .bind(user_id)
            .bind(fresh.expires_at())
            .fetch_one(&self.pool)
            .await?;

        let items = self.load_items(id).await?;
        Ok(Cart::from_parts(
            id, user_id, items, expires_at, created_at, updated_at,
        ))
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE carts SET expires_at = $2, updated_at = now() WHERE id = $1")
            .bind(cart.id())
            .bind(cart.expires_at())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart.id())
            .execute(&mut *tx)
            .await?;

        for (position, item) in cart.items().iter().enumerate() {
            let selection = serde_json::to_value(&item.selection)
                .map_err(|e| CartError::Persistence(e.to_string()))?;
            sqlx::query(
                "INSERT INTO cart_items \
                 (id, cart_id, product_id, selection, quantity, price, currency, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(item.id)
            .bind(cart.id())
            .bind(item.product_id)
            .bind(&selection)
            .bind(item.quantity as i32)
            .bind(item.price.amount())
            .bind(item.price.currency())
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
