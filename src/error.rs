//! Cart engine error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CartError {
    #[error("quantity must be a positive integer")]
    InvalidQuantity,

    #[error("no option selected for variant '{variant}'")]
    InvalidSelection { variant: String },

    #[error("'{value}' is not an option of variant '{variant}'")]
    InvalidOption { variant: String, value: String },

    /// Carries the stock the caller could still obtain so the client can
    /// offer a reduced quantity.
    #[error("insufficient stock: {available} available")]
    InsufficientStock { available: u32 },

    #[error("product not found")]
    ProductNotFound,

    #[error("product is no longer available")]
    ProductUnavailable,

    #[error("cart not found")]
    CartNotFound,

    #[error("item not found in cart")]
    ItemNotFound,

    #[error("storage error: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for CartError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl IntoResponse for CartError {
    fn into_response(self) -> Response {
        if let Self::Persistence(ref detail) = self {
            tracing::error!(error = %detail, "cart storage failure");
        }

        let status = match &self {
            Self::InvalidQuantity | Self::InvalidSelection { .. } | Self::InvalidOption { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::ProductNotFound | Self::CartNotFound | Self::ItemNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::ProductUnavailable => StatusCode::GONE,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Never leak storage details to clients.
        let body = match &self {
            Self::Persistence(_) => serde_json::json!({ "error": "internal error" }),
            Self::InsufficientStock { available } => serde_json::json!({
                "error": self.to_string(),
                "available_stock": available,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        fn status(err: CartError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            status(CartError::InsufficientStock { available: 2 }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(CartError::CartNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(CartError::InvalidQuantity), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CartError::Persistence("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stock_hint_display() {
        let err = CartError::InsufficientStock { available: 2 };
        assert_eq!(err.to_string(), "insufficient stock: 2 available");
    }
}
