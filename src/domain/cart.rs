//! Cart aggregate and line items.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;
use crate::error::CartError;

/// Carts untouched for this long are considered stale by the cart GC.
pub const CART_TTL_DAYS: i64 = 30;

/// One `{variant, option}` pair of a caller's selection.
///
/// Comparison is order-independent and string-normalized: two selections are
/// the same iff they contain the same (name, value) pairs after trimming and
/// lowercasing, regardless of submission order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectedOption {
    pub name: String,
    pub value: String,
}

pub(crate) fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

impl SelectedOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matches_variant(&self, variant_name: &str) -> bool {
        normalize(&self.name) == normalize(variant_name)
    }

    pub fn matches_value(&self, option_value: &str) -> bool {
        normalize(&self.value) == normalize(option_value)
    }
}

/// Canonical key for a selection: normalized pairs, sorted by variant name.
pub fn selection_key(selection: &[SelectedOption]) -> String {
    let mut pairs: Vec<String> = selection
        .iter()
        .map(|s| format!("{}={}", normalize(&s.name), normalize(&s.value)))
        .collect();
    pairs.sort();
    pairs.join(";")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub selection: Vec<SelectedOption>,
    pub quantity: u32,
    /// Price snapshot captured at last mutation/validation, not live.
    pub price: Money,
}

impl LineItem {
    pub fn new(product_id: Uuid, selection: Vec<SelectedOption>, quantity: u32, price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            selection,
            quantity,
            price,
        }
    }

    pub fn line_total(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

/// Transient note attached to a read when a line was auto-repaired or
/// dropped due to stale catalog/stock state. Never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartWarning {
    pub product_id: Uuid,
    pub message: String,
}

impl CartWarning {
    pub fn new(product_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            product_id,
            message: message.into(),
        }
    }
}

/// One cart per user, created lazily on first touch and never deleted,
/// only emptied. Two lines must never represent the same product under an
/// equivalent selection; an equivalent add merges instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    id: Uuid,
    user_id: Uuid,
    items: Vec<LineItem>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            items: vec![],
            expires_at: now + Duration::days(CART_TTL_DAYS),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn from_parts(
        id: Uuid,
        user_id: Uuid,
        items: Vec<LineItem>,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            items,
            expires_at,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn total(&self) -> Money {
        let currency = self
            .items
            .first()
            .map(|i| i.price.currency().to_string())
            .unwrap_or_else(|| "USD".to_string());
        self.items
            .iter()
            .fold(Money::zero(&currency), |acc, i| {
                acc.add(&i.line_total()).unwrap_or(acc)
            })
    }

    /// Finds the line holding the same product under an equivalent
    /// (order-independent, normalized) selection.
    pub fn find_line(&self, product_id: Uuid, selection: &[SelectedOption]) -> Option<&LineItem> {
        let key = selection_key(selection);
        self.items
            .iter()
            .find(|i| i.product_id == product_id && selection_key(&i.selection) == key)
    }

    pub fn line_by_id(&self, item_id: Uuid) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn push_line(&mut self, item: LineItem) {
        self.items.push(item);
        self.touch();
    }

    /// Replaces a line's quantity and refreshes its price snapshot.
    pub fn set_line(&mut self, item_id: Uuid, quantity: u32, price: Money) -> Result<(), CartError> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(CartError::ItemNotFound)?;
        item.quantity = quantity;
        item.price = price;
        self.touch();
        Ok(())
    }

    pub fn remove_line(&mut self, item_id: Uuid) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        if self.items.len() == before {
            return Err(CartError::ItemNotFound);
        }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }

    /// Wholesale item replacement, used by validation repair. Does not push
    /// expiry: repairs are not user mutations.
    pub(crate) fn replace_items(&mut self, items: Vec<LineItem>) {
        self.items = items;
        self.updated_at = Utc::now();
    }

    /// Pushed forward on every mutation; reads never extend expiry.
    pub fn push_expiry(&mut self) {
        self.expires_at = Utc::now() + Duration::days(CART_TTL_DAYS);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
