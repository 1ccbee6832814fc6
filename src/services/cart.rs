//! Cart operations and validation.
//!
//! Mutations flow resolver -> stock ledger -> cart persistence, with the
//! reservation taken before the cart is written and compensated if the write
//! fails. Reads always revalidate the whole cart against current catalog
//! state in a single batched product lookup.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Cart, CartWarning, LineItem, Product, SelectedOption};
use crate::error::{CartError, Result};
use crate::services::inventory::{availability, StockLedger};
use crate::services::summary::{CartSummary, CartSummaryBuilder, CouponEvaluator};
use crate::store::{CartStore, ProductCatalog, StockStore};

/// A cart fresh out of validation, plus notes about any line that had to be
/// repaired or dropped on the way.
#[derive(Clone, Debug, Serialize)]
pub struct ValidatedCart {
    pub cart: Cart,
    pub warnings: Vec<CartWarning>,
}

pub struct CartService {
    catalog: Arc<dyn ProductCatalog>,
    carts: Arc<dyn CartStore>,
    ledger: StockLedger,
    summary: CartSummaryBuilder,
}

impl CartService {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        carts: Arc<dyn CartStore>,
        stock: Arc<dyn StockStore>,
        coupons: Arc<dyn CouponEvaluator>,
    ) -> Self {
        Self {
            catalog,
            carts,
            ledger: StockLedger::new(stock),
            summary: CartSummaryBuilder::new(coupons),
        }
    }

    /// Lazily creates the user's cart on first touch and revalidates it.
    pub async fn get_or_create_cart(&self, user_id: Uuid) -> Result<ValidatedCart> {
        let cart = self.carts.get_or_create(user_id).await?;
        let (cart, warnings, _) = self.validate(cart).await?;
        Ok(ValidatedCart { cart, warnings })
    }

    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
        selection: Vec<SelectedOption>,
    ) -> Result<ValidatedCart> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let product = self
            .catalog
            .find_by_id(product_id)
            .await?
            .ok_or(CartError::ProductNotFound)?;
        if !product.is_active() {
            return Err(CartError::ProductUnavailable);
        }
        // Variant-less products ignore the selection entirely; canonicalize
        // to empty so stray selections cannot fork duplicate lines.
        let selection = if product.variants.is_empty() {
            Vec::new()
        } else {
            selection
        };
        let unit = product.resolve_unit(&selection)?;

        let mut cart = self.carts.get_or_create(user_id).await?;

        // An equivalent selection merges into the existing line instead of
        // creating a duplicate.
        let existing = cart
            .find_line(product_id, &selection)
            .map(|line| (line.id, line.quantity));
        let (held, target) = match existing {
            Some((_, qty)) => (
                qty,
                qty.checked_add(quantity).ok_or(CartError::InvalidQuantity)?,
            ),
            None => (0, quantity),
        };

        let outcome = self
            .ledger
            .check_and_reserve(&product, &unit, target, held)
            .await?;
        if !outcome.available && !outcome.can_backorder {
            return Err(CartError::InsufficientStock {
                available: outcome.available_stock,
            });
        }

        match existing {
            Some((item_id, _)) => cart.set_line(item_id, target, unit.price.clone())?,
            None => cart.push_line(LineItem::new(
                product_id,
                selection,
                quantity,
                unit.price.clone(),
            )),
        }
        cart.push_expiry();

        if let Err(err) = self.carts.save(&cart).await {
            // A failed persist must not keep the reservation.
            if let Err(release_err) = self
                .ledger
                .release(product.id, &unit.option_ids, target - held)
                .await
            {
                tracing::warn!(
                    product_id = %product.id,
                    error = %release_err,
                    "reservation leaked: release after failed cart save did not go through"
                );
            }
            return Err(err);
        }

        let (cart, warnings, _) = self.validate(cart).await?;
        Ok(ValidatedCart { cart, warnings })
    }

    /// Sets a line's absolute quantity. Zero or negative delegates to
    /// removal.
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i64,
    ) -> Result<Cart> {
        if quantity <= 0 {
            return self.remove_item(user_id, item_id).await;
        }
        let quantity = u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity)?;

        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let line = cart
            .line_by_id(item_id)
            .cloned()
            .ok_or(CartError::ItemNotFound)?;
        let product = self
            .catalog
            .find_by_id(line.product_id)
            .await?
            .ok_or(CartError::ProductNotFound)?;
        if !product.is_active() {
            return Err(CartError::ProductUnavailable);
        }
        let unit = product.resolve_unit(&line.selection)?;

        let outcome = self
            .ledger
            .check_and_reserve(&product, &unit, quantity, line.quantity)
            .await?;
        if !outcome.available && !outcome.can_backorder {
            return Err(CartError::InsufficientStock {
                available: outcome.available_stock,
            });
        }

        cart.set_line(item_id, quantity, unit.price.clone())?;
        cart.push_expiry();

        if let Err(err) = self.carts.save(&cart).await {
            // Undo the reservation delta so ledger and cart stay in step.
            let undo = if quantity > line.quantity {
                self.ledger
                    .release(product.id, &unit.option_ids, quantity - line.quantity)
                    .await
            } else {
                self.ledger
                    .check_and_reserve(&product, &unit, line.quantity, quantity)
                    .await
                    .map(|_| ())
            };
            if let Err(undo_err) = undo {
                tracing::warn!(
                    product_id = %product.id,
                    error = %undo_err,
                    "reservation out of step: undo after failed cart save did not go through"
                );
            }
            return Err(err);
        }
        Ok(cart)
    }

    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Cart> {
        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let line = cart
            .line_by_id(item_id)
            .cloned()
            .ok_or(CartError::ItemNotFound)?;

        cart.remove_line(item_id)?;
        cart.push_expiry();
        self.carts.save(&cart).await?;

        self.release_line_by_lookup(&line).await?;
        Ok(cart)
    }

    /// Empties the line list unconditionally and returns every held
    /// reservation to availability.
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<Cart> {
        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let lines = cart.items().to_vec();

        cart.clear();
        cart.push_expiry();
        self.carts.save(&cart).await?;

        let products = self.load_products_for(&lines).await?;
        for line in &lines {
            if let Some(product) = products.get(&line.product_id) {
                self.release_line(product, line).await?;
            }
        }
        Ok(cart)
    }

    /// Checkout-ready view: validated cart, line enrichment from the same
    /// batched lookup validation used, optional coupon. A rejected coupon
    /// never fails the summary, it only skips the discount.
    pub async fn get_cart_summary(
        &self,
        user_id: Uuid,
        coupon_code: Option<&str>,
    ) -> Result<CartSummary> {
        let cart = self.carts.get_or_create(user_id).await?;
        let (cart, warnings, products) = self.validate(cart).await?;
        self.summary
            .build(&cart, warnings, &products, user_id, coupon_code)
            .await
    }

    /// Revalidates every line against current catalog state in one pass.
    ///
    /// Missing or inactive products drop their lines; a partial shortfall
    /// clamps quantity down to what is still obtainable; price snapshots are
    /// refreshed. The repaired cart is persisted only when something
    /// actually changed. The loaded product map is returned so callers can
    /// reuse the batch instead of issuing a second lookup.
    async fn validate(
        &self,
        mut cart: Cart,
    ) -> Result<(Cart, Vec<CartWarning>, HashMap<Uuid, Product>)> {
        if cart.is_empty() {
            return Ok((cart, vec![], HashMap::new()));
        }

        let products = self.load_products_for(cart.items()).await?;
        let mut kept = Vec::with_capacity(cart.items().len());
        let mut warnings = Vec::new();
        let mut changed = false;

        for line in cart.items().to_vec() {
            let Some(product) = products.get(&line.product_id) else {
                warnings.push(CartWarning::new(line.product_id, "product not found"));
                changed = true;
                continue;
            };
            if !product.is_active() {
                self.release_line(product, &line).await?;
                warnings.push(CartWarning::new(product.id, "no longer available"));
                changed = true;
                continue;
            }
            let unit = match product.resolve_unit(&line.selection) {
                Ok(unit) => unit,
                Err(_) => {
                    warnings.push(CartWarning::new(
                        product.id,
                        "selection no longer available",
                    ));
                    changed = true;
                    continue;
                }
            };

            let outcome = availability(product, &unit, line.quantity, line.quantity);
            if outcome.available || outcome.can_backorder {
                if line.price != unit.price {
                    changed = true;
                }
                kept.push(LineItem {
                    price: unit.price,
                    ..line
                });
            } else if outcome.available_stock > 0 {
                // Partial shortfall: clamp, never drop below 1.
                let clamped = outcome.available_stock;
                self.ledger
                    .release(product.id, &unit.option_ids, line.quantity - clamped)
                    .await?;
                warnings.push(CartWarning::new(
                    product.id,
                    format!("only {clamped} left in stock, quantity reduced"),
                ));
                kept.push(LineItem {
                    quantity: clamped,
                    price: unit.price,
                    ..line
                });
                changed = true;
            } else {
                self.release_line(product, &line).await?;
                warnings.push(CartWarning::new(product.id, "out of stock"));
                changed = true;
            }
        }

        if changed {
            cart.replace_items(kept);
            self.carts.save(&cart).await?;
        }
        Ok((cart, warnings, products))
    }

    async fn load_products_for(&self, lines: &[LineItem]) -> Result<HashMap<Uuid, Product>> {
        if lines.is_empty() {
            return Ok(HashMap::new());
        }
        let mut ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products = self.catalog.find_many_by_ids(&ids).await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    async fn release_line(&self, product: &Product, line: &LineItem) -> Result<()> {
        match product.resolve_unit(&line.selection) {
            Ok(unit) => {
                self.ledger
                    .release(product.id, &unit.option_ids, line.quantity)
                    .await
            }
            // The selection no longer maps onto the catalog, so there is no
            // unit left to release against.
            Err(_) => Ok(()),
        }
    }

    async fn release_line_by_lookup(&self, line: &LineItem) -> Result<()> {
        match self.catalog.find_by_id(line.product_id).await? {
            Some(product) => self.release_line(&product, line).await,
            None => Ok(()),
        }
    }
}
