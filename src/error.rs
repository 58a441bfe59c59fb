// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

// endregion: --- Imports

// region:    --- Api Error

/// Crate-wide error type. Every variant maps to a stable machine-readable
/// code plus an HTTP status, so callers can branch without parsing messages.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("listing not found")]
    ListingNotFound,

    #[error("listing is not open for bidding")]
    NotAnAuction,

    #[error("the auction has already ended")]
    AuctionClosed,

    #[error("bid must exceed {minimum}")]
    BidTooLow { minimum: i64 },

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("unsupported payment method for this transaction type")]
    InvalidPaymentMethod,

    #[error("missing contact details for the selected payment method")]
    MissingContact,

    #[error("transaction not found")]
    TransactionNotFound,

    #[error("transaction already processed")]
    AlreadyProcessed,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::ListingNotFound => "NOT_FOUND",
            ApiError::NotAnAuction => "NOT_AN_AUCTION",
            ApiError::AuctionClosed => "AUCTION_CLOSED",
            ApiError::BidTooLow { .. } => "BID_TOO_LOW",
            ApiError::InvalidAmount => "INVALID_AMOUNT",
            ApiError::InvalidPaymentMethod => "INVALID_PAYMENT_METHOD",
            ApiError::MissingContact => "MISSING_CONTACT",
            ApiError::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ApiError::AlreadyProcessed => "ALREADY_PROCESSED",
            ApiError::InvalidCode => "INVALID_CODE",
            ApiError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ApiError::Database(_) => "DATABASE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ListingNotFound | ApiError::TransactionNotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyProcessed => StatusCode::CONFLICT,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

// endregion: --- Api Error

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        assert_eq!(ApiError::BidTooLow { minimum: 100 }.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InsufficientBalance.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn replayed_verification_maps_to_conflict() {
        assert_eq!(ApiError::AlreadyProcessed.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::AlreadyProcessed.code(), "ALREADY_PROCESSED");
    }

    #[test]
    fn datastore_failures_are_server_errors() {
        let err = ApiError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "DATABASE");
    }
}

// endregion: --- Tests
