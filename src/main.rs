//! Cartledger - cart and inventory reservation service.
//!
//! Thin HTTP layer over [`CartService`]; request validation and response
//! shaping only, no cart logic.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use cartledger::domain::SelectedOption;
use cartledger::services::{CartService, CartSummary, NoCoupons, ValidatedCart};
use cartledger::store::PgStore;
use cartledger::{Cart, CartError};

#[derive(Clone)]
struct AppState {
    cart: Arc<CartService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let store = Arc::new(PgStore::new(db));
    let cart = Arc::new(CartService::new(
        store.clone(),
        store.clone(),
        store,
        Arc::new(NoCoupons),
    ));
    let state = AppState { cart };

    let app = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "cartledger"})) }),
        )
        .route(
            "/api/v1/cart/:user_id",
            get(get_cart).delete(clear_cart),
        )
        .route("/api/v1/cart/:user_id/items", post(add_item))
        .route(
            "/api/v1/cart/:user_id/items/:item_id",
            axum::routing::put(update_item_quantity).delete(remove_item),
        )
        .route("/api/v1/cart/:user_id/summary", get(get_cart_summary))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("cartledger listening on 0.0.0.0:{}", port);
    axum::serve(
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?,
        app,
    )
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1))]
    quantity: u32,
    #[serde(default)]
    selection: Vec<SelectedOption>,
}

#[derive(Debug, Deserialize)]
struct UpdateQuantityRequest {
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    coupon: Option<String>,
}

async fn get_cart(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ValidatedCart>, CartError> {
    Ok(Json(s.cart.get_or_create_cart(user_id).await?))
}

async fn add_item(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(r): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ValidatedCart>), CartError> {
    r.validate().map_err(|_| CartError::InvalidQuantity)?;
    let cart = s
        .cart
        .add_item(user_id, r.product_id, r.quantity, r.selection)
        .await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

async fn update_item_quantity(
    State(s): State<AppState>,
    Path((user_id, item_id)): Path<(Uuid, Uuid)>,
    Json(r): Json<UpdateQuantityRequest>,
) -> Result<Json<Cart>, CartError> {
    let cart = s
        .cart
        .update_item_quantity(user_id, item_id, r.quantity)
        .await?;
    Ok(Json(cart))
}

async fn remove_item(
    State(s): State<AppState>,
    Path((user_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Cart>, CartError> {
    Ok(Json(s.cart.remove_item(user_id, item_id).await?))
}

async fn clear_cart(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Cart>, CartError> {
    Ok(Json(s.cart.clear_cart(user_id).await?))
}

async fn get_cart_summary(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(p): Query<SummaryParams>,
) -> Result<Json<CartSummary>, CartError> {
    let summary = s
        .cart
        .get_cart_summary(user_id, p.coupon.as_deref())
        .await?;
    Ok(Json(summary))
}
