//! Domain model: products as read by the cart engine, carts, value objects.

pub mod cart;
pub mod product;
pub mod value_objects;

pub use cart::{selection_key, Cart, CartWarning, LineItem, SelectedOption, CART_TTL_DAYS};
pub use product::{Product, ProductStatus, ResolvedUnit, Variant, VariantOption};
pub use value_objects::Money;
