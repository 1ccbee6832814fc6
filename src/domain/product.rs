//! Product catalog view used by the cart engine.
//!
//! Products are owned and mutated by the catalog subsystem; this engine only
//! reads them and, through the stock store, moves their reservation counters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cart::SelectedOption;
use crate::domain::value_objects::Money;
use crate::error::CartError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Money,
    pub status: ProductStatus,
    /// When false, stock counters are informational only and every
    /// reservation succeeds.
    pub track_inventory: bool,
    /// Permits a sale when available stock is exactly zero.
    pub allow_backorder: bool,
    /// Flat stock counter, used when the product declares no variants.
    pub stock: i64,
    /// Units currently held by carts against the flat counter.
    pub reserved: i64,
    pub variants: Vec<Variant>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named product axis ("Size") with its selectable options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub name: String,
    pub options: Vec<VariantOption>,
}

/// One selectable value of a variant, independently stocked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariantOption {
    pub id: Uuid,
    pub value: String,
    pub price_delta: Decimal,
    pub stock: i64,
    pub reserved: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

/// The stock-bearing unit a selection resolves to: the product itself for
/// variant-less products, otherwise one option per declared variant.
///
/// `stock` and `available` are snapshots taken at catalog-read time; the
/// atomic guard against oversell lives in the stock store, not here.
#[derive(Clone, Debug)]
pub struct ResolvedUnit {
    pub option_ids: Vec<Uuid>,
    pub price: Money,
    pub stock: i64,
    pub available: i64,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    /// Resolves a caller-supplied selection to the exact stock-bearing unit.
    ///
    /// Variant-less products resolve to themselves and ignore the selection.
    /// Otherwise every declared variant must be matched by exactly one
    /// selected option; the unit price is the base price plus the matched
    /// options' deltas, and the unit's counters are the minimum across the
    /// matched options.
    pub fn resolve_unit(&self, selection: &[SelectedOption]) -> Result<ResolvedUnit, CartError> {
        if self.variants.is_empty() {
            return Ok(ResolvedUnit {
                option_ids: Vec::new(),
                price: self.price.clone(),
                stock: self.stock,
                available: self.stock - self.reserved,
            });
        }

        let mut option_ids = Vec::with_capacity(self.variants.len());
        let mut amount = self.price.amount();
        let mut stock = i64::MAX;
        let mut available = i64::MAX;

        for variant in &self.variants {
            let wanted = selection
                .iter()
                .find(|s| s.matches_variant(&variant.name))
                .ok_or_else(|| CartError::InvalidSelection {
                    variant: variant.name.clone(),
                })?;
            let option = variant
                .options
                .iter()
                .find(|o| wanted.matches_value(&o.value))
                .ok_or_else(|| CartError::InvalidOption {
                    variant: variant.name.clone(),
                    value: wanted.value.clone(),
                })?;

            option_ids.push(option.id);
            amount += option.price_delta;
            stock = stock.min(option.stock);
            available = available.min(option.stock - option.reserved);
        }

        Ok(ResolvedUnit {
            option_ids,
            price: Money::new(amount, self.price.currency()),
            stock,
            available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(variants: Vec<Variant>) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Tee".into(),
            slug: "tee".into(),
            description: None,
            price: Money::usd(Decimal::new(2000, 2)),
            status: ProductStatus::Active,
            track_inventory: true,
            allow_backorder: false,
            stock: 7,
            reserved: 2,
            variants,
            images: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn option(value: &str, delta: i64, stock: i64) -> VariantOption {
        VariantOption {
            id: Uuid::new_v4(),
            value: value.into(),
            price_delta: Decimal::new(delta, 2),
            stock,
            reserved: 0,
        }
    }

    fn pick(name: &str, value: &str) -> SelectedOption {
        SelectedOption {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_flat_product_resolves_to_itself() {
        let p = product(vec![]);
        let unit = p.resolve_unit(&[pick("Size", "M")]).unwrap();
        assert!(unit.option_ids.is_empty());
        assert_eq!(unit.stock, 7);
        assert_eq!(unit.available, 5);
        assert_eq!(unit.price.amount(), Decimal::new(2000, 2));
    }

    #[test]
    fn test_missing_variant_selection() {
        let p = product(vec![Variant {
            id: Uuid::new_v4(),
            name: "Size".into(),
            options: vec![option("M", 0, 3)],
        }]);
        let err = p.resolve_unit(&[]).unwrap_err();
        assert!(matches!(err, CartError::InvalidSelection { variant } if variant == "Size"));
    }

    #[test]
    fn test_unknown_option_value() {
        let p = product(vec![Variant {
            id: Uuid::new_v4(),
            name: "Size".into(),
            options: vec![option("M", 0, 3)],
        }]);
        let err = p.resolve_unit(&[pick("Size", "XXL")]).unwrap_err();
        assert!(matches!(err, CartError::InvalidOption { .. }));
    }

    #[test]
    fn test_price_sums_deltas_and_stock_takes_minimum() {
        let p = product(vec![
            Variant {
                id: Uuid::new_v4(),
                name: "Size".into(),
                options: vec![option("L", 200, 4)],
            },
            Variant {
                id: Uuid::new_v4(),
                name: "Color".into(),
                options: vec![option("Red", 50, 9)],
            },
        ]);
        let unit = p
            .resolve_unit(&[pick("Color", "Red"), pick("Size", "L")])
            .unwrap();
        assert_eq!(unit.option_ids.len(), 2);
        assert_eq!(unit.price.amount(), Decimal::new(2250, 2));
        assert_eq!(unit.stock, 4);
    }

    #[test]
    fn test_selection_matching_is_case_and_whitespace_insensitive() {
        let p = product(vec![Variant {
            id: Uuid::new_v4(),
            name: "Size".into(),
            options: vec![option("M", 0, 3)],
        }]);
        assert!(p.resolve_unit(&[pick(" size ", "m")]).is_ok());
    }
}
