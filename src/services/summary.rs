//! Checkout-ready cart summary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Cart, CartWarning, LineItem, Money, Product, SelectedOption};
use crate::error::Result;

#[derive(Clone, Debug, Serialize)]
pub struct SummaryLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub slug: String,
    pub image: Option<String>,
    pub selection: Vec<SelectedOption>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartSummary {
    pub cart_id: Uuid,
    pub items: Vec<SummaryLine>,
    pub item_count: u32,
    pub subtotal: Money,
    pub discount: Money,
    pub coupon: Option<String>,
    pub total: Money,
    pub warnings: Vec<CartWarning>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Fixed,
    Percentage,
}

#[derive(Clone, Debug)]
pub struct CouponApplication {
    pub discount_amount: Decimal,
    pub discount_type: DiscountType,
    pub final_amount: Decimal,
}

#[derive(Clone, Debug, Error)]
#[error("coupon rejected: {0}")]
pub struct CouponRejected(pub String);

/// External coupon collaborator. Rejections are ordinary outcomes here, not
/// failures: summarization continues without the discount.
#[async_trait]
pub trait CouponEvaluator: Send + Sync {
    async fn validate_and_apply(
        &self,
        code: &str,
        subtotal: &Money,
        user_id: Uuid,
        items: &[LineItem],
    ) -> std::result::Result<CouponApplication, CouponRejected>;
}

/// Default evaluator for deployments without a coupon subsystem.
pub struct NoCoupons;

#[async_trait]
impl CouponEvaluator for NoCoupons {
    async fn validate_and_apply(
        &self,
        _code: &str,
        _subtotal: &Money,
        _user_id: Uuid,
        _items: &[LineItem],
    ) -> std::result::Result<CouponApplication, CouponRejected> {
        Err(CouponRejected("no coupons configured".into()))
    }
}

pub struct CartSummaryBuilder {
    coupons: Arc<dyn CouponEvaluator>,
}

impl CartSummaryBuilder {
    pub fn new(coupons: Arc<dyn CouponEvaluator>) -> Self {
        Self { coupons }
    }

    /// Assembles the summary from an already-validated cart and the product
    /// map loaded during validation; no further catalog lookups happen here.
    pub async fn build(
        &self,
        cart: &Cart,
        warnings: Vec<CartWarning>,
        products: &HashMap<Uuid, Product>,
        user_id: Uuid,
        coupon_code: Option<&str>,
    ) -> Result<CartSummary> {
        let subtotal = cart.total();
        let currency = subtotal.currency().to_string();

        let (discount, coupon) = match coupon_code {
            Some(code) if !cart.is_empty() => {
                match self
                    .coupons
                    .validate_and_apply(code, &subtotal, user_id, cart.items())
                    .await
                {
                    Ok(app) => (
                        Money::new(app.discount_amount, &currency),
                        Some(code.to_string()),
                    ),
                    Err(err) => {
                        tracing::debug!(coupon = code, error = %err, "coupon rejected, summarizing without discount");
                        (Money::zero(&currency), None)
                    }
                }
            }
            _ => (Money::zero(&currency), None),
        };

        let items = cart
            .items()
            .iter()
            .map(|line| {
                let product = products.get(&line.product_id);
                SummaryLine {
                    item_id: line.id,
                    product_id: line.product_id,
                    name: product.map(|p| p.name.clone()).unwrap_or_default(),
                    slug: product.map(|p| p.slug.clone()).unwrap_or_default(),
                    image: product.and_then(|p| p.primary_image().map(String::from)),
                    selection: line.selection.clone(),
                    quantity: line.quantity,
                    unit_price: line.price.clone(),
                    line_total: line.line_total(),
                }
            })
            .collect();

        let total = subtotal
            .subtract(&discount)
            .unwrap_or_else(|_| subtotal.clone());

        Ok(CartSummary {
            cart_id: cart.id(),
            items,
            item_count: cart.item_count(),
            subtotal,
            discount,
            coupon,
            total,
            warnings,
            expires_at: cart.expires_at(),
        })
    }
}
