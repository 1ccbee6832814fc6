//! Service layer: stock ledger, cart operations, summary building.

pub mod cart;
pub mod inventory;
pub mod summary;

pub use cart::{CartService, ValidatedCart};
pub use inventory::{availability, ReservationOutcome, StockLedger};
pub use summary::{
    CartSummary, CartSummaryBuilder, CouponApplication, CouponEvaluator, CouponRejected,
    DiscountType, NoCoupons, SummaryLine,
};
