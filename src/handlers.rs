// region:    --- Imports
use crate::auth::AuthUser;
use crate::bidding::commands::{handle_place_bid as command_place_bid, PlaceBidCommand};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::payment::code::CodeDelivery;
use crate::payment::commands::{
    handle_initiate_payment as command_initiate_payment,
    handle_verify_payment as command_verify_payment, InitiatePaymentCommand, RequestOrigin,
    VerifyPaymentCommand,
};
use crate::query;
use crate::settlement;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

/// Shared router state: the pool wrapper plus the verification-code sink.
pub type AppState = (Arc<DatabaseManager>, Arc<dyn CodeDelivery>);

// region:    --- Command Handlers

/// Place a bid on an auctioned listing.
pub async fn handle_place_bid(
    State((db_manager, _)): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(cmd): Json<PlaceBidCommand>,
) -> Result<impl IntoResponse, ApiError> {
    info!("{:<12} --> bid request: {:?}", "Handler", cmd);
    let bid = command_place_bid(cmd, user_id, &db_manager).await?;
    Ok(Json(serde_json::json!({
        "message": "Bid placed successfully.",
        "bid_id": bid.id,
        "amount": bid.amount,
    })))
}

/// Run one settlement pass over all expired auctions.
pub async fn handle_run_settlement(
    State((db_manager, _)): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    info!("{:<12} --> settlement run requested", "Handler");
    let processed = settlement::settle_expired_auctions(db_manager.pool()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "processed": processed,
    })))
}

/// Send closing-soon reminders for auctions ending within the hour.
pub async fn handle_send_reminders(
    State((db_manager, _)): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let processed = settlement::send_closing_reminders(db_manager.pool()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "processed": processed,
    })))
}

/// Open a pending deposit/withdrawal and send its verification code.
pub async fn handle_initiate_payment(
    State((db_manager, code_delivery)): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(cmd): Json<InitiatePaymentCommand>,
) -> Result<impl IntoResponse, ApiError> {
    let origin = request_origin(&headers);
    let transaction_id =
        command_initiate_payment(cmd, user_id, origin, &db_manager, code_delivery.as_ref()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "transaction_id": transaction_id,
        "requires_verification": true,
        "message": "Verification code sent. Please verify to complete the transaction.",
    })))
}

/// Verify a pending transaction and apply the balance change.
pub async fn handle_verify_payment(
    State((db_manager, _)): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(cmd): Json<VerifyPaymentCommand>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction_type = command_verify_payment(cmd, user_id, &db_manager).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Payment verified successfully",
        "transaction_type": transaction_type,
    })))
}

fn request_origin(headers: &HeaderMap) -> RequestOrigin {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestOrigin {
        ip: header("x-forwarded-for"),
        user_agent: header("user-agent"),
    }
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

/// All listings.
pub async fn handle_get_listings(
    State((db_manager, _)): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let listings = query::handlers::get_all_listings(&db_manager).await?;
    Ok(Json(listings))
}

/// A single listing.
pub async fn handle_get_listing(
    State((db_manager, _)): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = query::handlers::get_listing(&db_manager, listing_id)
        .await?
        .ok_or(ApiError::ListingNotFound)?;
    Ok(Json(listing))
}

/// Bids on a listing, best first.
pub async fn handle_get_listing_bids(
    State((db_manager, _)): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let bids = query::handlers::get_listing_bids(&db_manager, listing_id).await?;
    Ok(Json(bids))
}

/// Current highest bid on a listing.
pub async fn handle_get_highest_bid(
    State((db_manager, _)): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let bid = query::handlers::get_highest_bid(&db_manager, listing_id).await?;
    Ok(Json(bid))
}

/// The bid currently flagged as winning on a listing.
pub async fn handle_get_winning_bid(
    State((db_manager, _)): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let bid = query::handlers::get_winning_bid(&db_manager, listing_id).await?;
    Ok(Json(bid))
}

/// Caller's spendable balance. Profiles are provisioned by the auth layer;
/// a missing row reads as zero.
pub async fn handle_get_balance(
    State((db_manager, _)): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let balance = query::handlers::get_balance(&db_manager, user_id)
        .await?
        .unwrap_or(0);
    Ok(Json(serde_json::json!({ "balance": balance })))
}

/// Caller's audit-trail rows, newest first.
pub async fn handle_get_transactions(
    State((db_manager, _)): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let entries = query::handlers::get_user_transactions(&db_manager, user_id).await?;
    Ok(Json(entries))
}

// endregion: --- Query Handlers
