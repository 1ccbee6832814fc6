//! End-to-end cart flows against the in-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use cartledger::domain::{
    LineItem, Money, Product, ProductStatus, SelectedOption, Variant, VariantOption,
};
use cartledger::error::CartError;
use cartledger::services::{
    CartService, CouponApplication, CouponEvaluator, CouponRejected, DiscountType, NoCoupons,
};
use cartledger::store::{CartStore, MemoryStore};
use cartledger::Cart;

fn flat_product(stock: i64, track: bool, backorder: bool) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: "Enamel Mug".into(),
        slug: "enamel-mug".into(),
        description: None,
        price: Money::usd(Decimal::new(1200, 2)),
        status: ProductStatus::Active,
        track_inventory: track,
        allow_backorder: backorder,
        stock,
        reserved: 0,
        variants: vec![],
        images: vec!["https://cdn.example.com/mug.jpg".into()],
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

fn sized_product(m_stock: i64, l_stock: i64, backorder: bool) -> Product {
    let mut p = flat_product(0, true, backorder);
    p.name = "Logo Tee".into();
    p.slug = "logo-tee".into();
    p.variants = vec![Variant {
        id: Uuid::new_v4(),
        name: "Size".into(),
        options: vec![option("M", 0, m_stock), option("L", 100, l_stock)],
    }];
    p
}

fn service(store: &Arc<MemoryStore>) -> CartService {
    service_with_coupons(store, Arc::new(NoCoupons))
}

fn service_with_coupons(store: &Arc<MemoryStore>, coupons: Arc<dyn CouponEvaluator>) -> CartService {
    CartService::new(store.clone(), store.clone(), store.clone(), coupons)
}

fn pick(name: &str, value: &str) -> SelectedOption {
    SelectedOption::new(name, value)
}

#[tokio::test]
async fn test_basic_add_and_insufficient_stock() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    let result = svc.add_item(user, pid, 3, vec![]).await.unwrap();
    assert_eq!(result.cart.items().len(), 1);
    assert_eq!(result.cart.items()[0].quantity, 3);
    assert!(result.warnings.is_empty());

    // Stock drops externally to 2; merging to 6 must fail with the hint.
    store.set_stock(pid, 2);
    let err = svc.add_item(user, pid, 3, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { available: 2 }));

    // The failed add must not have touched the persisted line.
    let cart = store.find_by_user(user).await.unwrap().unwrap();
    assert_eq!(cart.items()[0].quantity, 3);
}

#[tokio::test]
async fn test_add_rejects_zero_quantity() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    let err = svc.add_item(user, pid, 0, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::InvalidQuantity));

    // Rejected before any side effect: no cart, no reservation.
    assert!(store.find_by_user(user).await.unwrap().is_none());
    assert_eq!(store.flat_reserved(pid), 0);
}

#[tokio::test]
async fn test_variant_merge_and_zero_stock_option() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = sized_product(10, 0, false);
    let pid = p.id;
    store.insert_product(p);

    svc.add_item(user, pid, 1, vec![pick("Size", "M")])
        .await
        .unwrap();
    let result = svc
        .add_item(user, pid, 2, vec![pick("size", " m ")])
        .await
        .unwrap();
    assert_eq!(result.cart.items().len(), 1);
    assert_eq!(result.cart.items()[0].quantity, 3);

    let err = svc
        .add_item(user, pid, 1, vec![pick("Size", "L")])
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { available: 0 }));
}

#[tokio::test]
async fn test_merge_is_order_independent_across_axes() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let mut p = flat_product(0, true, false);
    p.variants = vec![
        Variant {
            id: Uuid::new_v4(),
            name: "Size".into(),
            options: vec![option("M", 0, 10)],
        },
        Variant {
            id: Uuid::new_v4(),
            name: "Color".into(),
            options: vec![option("Red", 0, 10)],
        },
    ];
    let pid = p.id;
    store.insert_product(p);

    svc.add_item(user, pid, 1, vec![pick("Size", "M"), pick("Color", "Red")])
        .await
        .unwrap();
    let result = svc
        .add_item(user, pid, 1, vec![pick("Color", "Red"), pick("Size", "M")])
        .await
        .unwrap();
    assert_eq!(result.cart.items().len(), 1);
    assert_eq!(result.cart.items()[0].quantity, 2);
}

#[tokio::test]
async fn test_variant_selection_errors() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = sized_product(5, 5, false);
    let pid = p.id;
    store.insert_product(p);

    let err = svc.add_item(user, pid, 1, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::InvalidSelection { .. }));

    let err = svc
        .add_item(user, pid, 1, vec![pick("Size", "XXL")])
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::InvalidOption { .. }));
}

#[tokio::test]
async fn test_validation_clamps_quantity() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    svc.add_item(user, pid, 5, vec![]).await.unwrap();
    store.set_stock(pid, 2);

    let result = svc.get_or_create_cart(user).await.unwrap();
    assert_eq!(result.cart.items().len(), 1);
    assert_eq!(result.cart.items()[0].quantity, 2);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].product_id, pid);

    // The clamp released the surplus reservation.
    assert_eq!(store.flat_reserved(pid), 2);

    // Repair was persisted; a second read is clean.
    let again = svc.get_or_create_cart(user).await.unwrap();
    assert!(again.warnings.is_empty());
    assert_eq!(again.cart.items()[0].quantity, 2);
}

#[tokio::test]
async fn test_validation_removes_dead_lines() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();

    let gone = flat_product(5, true, false);
    let gone_id = gone.id;
    let archived = flat_product(5, true, false);
    let archived_id = archived.id;
    let emptied = flat_product(2, true, false);
    let emptied_id = emptied.id;
    store.insert_product(gone);
    store.insert_product(archived);
    store.insert_product(emptied);

    svc.add_item(user, gone_id, 1, vec![]).await.unwrap();
    svc.add_item(user, archived_id, 1, vec![]).await.unwrap();
    svc.add_item(user, emptied_id, 2, vec![]).await.unwrap();

    store.remove_product(gone_id);
    store.set_status(archived_id, ProductStatus::Archived);
    store.set_stock(emptied_id, 0);

    let result = svc.get_or_create_cart(user).await.unwrap();
    assert!(result.cart.is_empty());
    assert_eq!(result.warnings.len(), 3);
    // Dropping the zero-stock line returned its reservation.
    assert_eq!(store.flat_reserved(emptied_id), 0);
}

#[tokio::test]
async fn test_validation_refreshes_price_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    svc.add_item(user, pid, 1, vec![]).await.unwrap();
    store.set_price(pid, Money::usd(Decimal::new(1500, 2)));

    let result = svc.get_or_create_cart(user).await.unwrap();
    assert_eq!(
        result.cart.items()[0].price.amount(),
        Decimal::new(1500, 2)
    );
    // A price refresh is a repair, not a user-visible problem.
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_update_quantity_and_delegated_removal() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    let result = svc.add_item(user, pid, 2, vec![]).await.unwrap();
    let item_id = result.cart.items()[0].id;

    let cart = svc.update_item_quantity(user, item_id, 4).await.unwrap();
    assert_eq!(cart.items()[0].quantity, 4);
    assert_eq!(store.flat_reserved(pid), 4);

    let err = svc.update_item_quantity(user, item_id, 9).await.unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { available: 5 }));

    let cart = svc.update_item_quantity(user, item_id, 0).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(store.flat_reserved(pid), 0);
}

#[tokio::test]
async fn test_remove_and_clear_release_reservations() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let p = flat_product(3, true, false);
    let pid = p.id;
    store.insert_product(p);

    let result = svc.add_item(alice, pid, 3, vec![]).await.unwrap();
    let item_id = result.cart.items()[0].id;

    // Everything is held by Alice.
    let err = svc.add_item(bob, pid, 1, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { available: 0 }));

    svc.remove_item(alice, item_id).await.unwrap();
    svc.add_item(bob, pid, 3, vec![]).await.unwrap();

    let cart = svc.clear_cart(bob).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(store.flat_reserved(pid), 0);
}

#[tokio::test]
async fn test_missing_cart_and_item() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();

    let err = svc
        .update_item_quantity(user, Uuid::new_v4(), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::CartNotFound));
    let err = svc.clear_cart(user).await.unwrap_err();
    assert!(matches!(err, CartError::CartNotFound));

    svc.get_or_create_cart(user).await.unwrap();
    let err = svc.remove_item(user, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CartError::ItemNotFound));
}

#[tokio::test]
async fn test_untracked_and_backorder_policies() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();

    let untracked = flat_product(0, false, false);
    let untracked_id = untracked.id;
    store.insert_product(untracked);
    let result = svc.add_item(user, untracked_id, 50, vec![]).await.unwrap();
    assert_eq!(result.cart.items()[0].quantity, 50);

    let backorderable = flat_product(0, true, true);
    let backorderable_id = backorderable.id;
    store.insert_product(backorderable);
    let result = svc
        .add_item(user, backorderable_id, 2, vec![])
        .await
        .unwrap();
    assert_eq!(result.cart.items().len(), 2);

    // Backorder fills a zero-stock gap only, never a partial shortfall.
    let partial = flat_product(1, true, true);
    let partial_id = partial.id;
    store.insert_product(partial);
    let err = svc.add_item(user, partial_id, 3, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::InsufficientStock { available: 1 }));
}

#[tokio::test]
async fn test_expiry_pushed_on_mutation_not_on_read() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    let before = svc.get_or_create_cart(user).await.unwrap();
    let read_again = svc.get_or_create_cart(user).await.unwrap();
    assert_eq!(before.cart.expires_at(), read_again.cart.expires_at());

    let after = svc.add_item(user, pid, 1, vec![]).await.unwrap();
    assert!(after.cart.expires_at() >= before.cart.expires_at());
}

struct TenOff;

#[async_trait]
impl CouponEvaluator for TenOff {
    async fn validate_and_apply(
        &self,
        code: &str,
        subtotal: &Money,
        _user_id: Uuid,
        _items: &[LineItem],
    ) -> Result<CouponApplication, CouponRejected> {
        if code != "TEN" {
            return Err(CouponRejected("unknown code".into()));
        }
        let discount = Decimal::new(1000, 2).min(subtotal.amount());
        Ok(CouponApplication {
            discount_amount: discount,
            discount_type: DiscountType::Fixed,
            final_amount: subtotal.amount() - discount,
        })
    }
}

#[tokio::test]
async fn test_summary_totals_and_coupon_tolerance() {
    let store = Arc::new(MemoryStore::new());
    let svc = service_with_coupons(&store, Arc::new(TenOff));
    let user = Uuid::new_v4();
    let p = flat_product(10, true, false);
    let pid = p.id;
    store.insert_product(p);

    svc.add_item(user, pid, 3, vec![]).await.unwrap();

    // 3 x 12.00 with a rejected code: summarization proceeds undiscounted.
    let summary = svc.get_cart_summary(user, Some("EXPIRED10")).await.unwrap();
    assert_eq!(summary.subtotal.amount(), Decimal::new(3600, 2));
    assert_eq!(summary.discount.amount(), Decimal::ZERO);
    assert_eq!(summary.total.amount(), Decimal::new(3600, 2));
    assert!(summary.coupon.is_none());
    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.items[0].name, "Enamel Mug");
    assert_eq!(summary.items[0].slug, "enamel-mug");
    assert!(summary.items[0].image.is_some());

    let summary = svc.get_cart_summary(user, Some("TEN")).await.unwrap();
    assert_eq!(summary.discount.amount(), Decimal::new(1000, 2));
    assert_eq!(summary.total.amount(), Decimal::new(2600, 2));
    assert_eq!(summary.coupon.as_deref(), Some("TEN"));
}

#[tokio::test]
async fn test_summary_issues_one_batched_lookup() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let user = Uuid::new_v4();

    for _ in 0..3 {
        let p = flat_product(5, true, false);
        let pid = p.id;
        store.insert_product(p);
        svc.add_item(user, pid, 1, vec![]).await.unwrap();
    }

    store.reset_lookup_counts();
    let summary = svc.get_cart_summary(user, None).await.unwrap();
    assert_eq!(summary.items.len(), 3);
    assert_eq!(store.batch_lookup_count(), 1);
    assert_eq!(store.single_lookup_count(), 0);
}

/// Cart store that can be told to reject saves, for exercising the
/// reservation compensation on failed persists.
struct FailingSaves {
    inner: Arc<MemoryStore>,
    fail_saves: AtomicBool,
}

impl FailingSaves {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
        }
    }

    fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CartStore for FailingSaves {
    async fn find_by_user(&self, user_id: Uuid) -> cartledger::Result<Option<Cart>> {
        self.inner.find_by_user(user_id).await
    }

    async fn get_or_create(&self, user_id: Uuid) -> cartledger::Result<Cart> {
        self.inner.get_or_create(user_id).await
    }

    async fn save(&self, cart: &Cart) -> cartledger::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CartError::Persistence("save rejected".into()));
        }
        self.inner.save(cart).await
    }
}

#[tokio::test]
async fn test_failed_save_releases_reservation() {
    let store = Arc::new(MemoryStore::new());
    let carts = Arc::new(FailingSaves::new(store.clone()));
    let svc = CartService::new(
        store.clone(),
        carts.clone(),
        store.clone(),
        Arc::new(NoCoupons),
    );
    let user = Uuid::new_v4();
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    carts.fail_saves(true);
    let err = svc.add_item(user, pid, 3, vec![]).await.unwrap_err();
    assert!(matches!(err, CartError::Persistence(_)));
    // The reservation taken for the doomed add was handed back.
    assert_eq!(store.flat_reserved(pid), 0);

    carts.fail_saves(false);
    let result = svc.add_item(user, pid, 2, vec![]).await.unwrap();
    let item_id = result.cart.items()[0].id;
    assert_eq!(store.flat_reserved(pid), 2);

    carts.fail_saves(true);
    let err = svc.update_item_quantity(user, item_id, 4).await.unwrap_err();
    assert!(matches!(err, CartError::Persistence(_)));
    // The delta reserved for the doomed update was undone too.
    assert_eq!(store.flat_reserved(pid), 2);
}

#[tokio::test]
async fn test_no_oversell_under_concurrent_adds() {
    let store = Arc::new(MemoryStore::new());
    let svc = Arc::new(service(&store));
    let p = flat_product(5, true, false);
    let pid = p.id;
    store.insert_product(p);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.add_item(Uuid::new_v4(), pid, 1, vec![]).await
        }));
    }

    let mut accepted = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                accepted += result.cart.item_count();
                assert_eq!(result.cart.item_count(), 1);
            }
            Err(err) => assert!(matches!(err, CartError::InsufficientStock { .. })),
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(store.flat_reserved(pid), 5);
}
