// region:    --- Imports
use super::queries;
use crate::bidding::model::{Bid, Listing};
use crate::database::DatabaseManager;
use crate::payment::model::LedgerEntry;
use sqlx::Error as SqlxError;
use tracing::info;

// endregion: --- Imports

// region:    --- Query Handlers

/// Look up a single listing.
pub async fn get_listing(
    db_manager: &DatabaseManager,
    listing_id: i64,
) -> Result<Option<Listing>, SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Listing>(queries::GET_LISTING)
                    .bind(listing_id)
                    .fetch_optional(&mut **tx)
                    .await
            })
        })
        .await
}

/// All listings, newest first.
pub async fn get_all_listings(db_manager: &DatabaseManager) -> Result<Vec<Listing>, SqlxError> {
    info!("{:<12} --> fetching all listings", "Query");
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Listing>(queries::GET_ALL_LISTINGS)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

/// Bids on a listing, highest amount first.
pub async fn get_listing_bids(
    db_manager: &DatabaseManager,
    listing_id: i64,
) -> Result<Vec<Bid>, SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Bid>(queries::GET_LISTING_BIDS)
                    .bind(listing_id)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

/// Current highest bid on a listing, if any bids exist.
pub async fn get_highest_bid(
    db_manager: &DatabaseManager,
    listing_id: i64,
) -> Result<Option<Bid>, SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Bid>(queries::GET_HIGHEST_BID)
                    .bind(listing_id)
                    .fetch_optional(&mut **tx)
                    .await
            })
        })
        .await
}

/// The bid currently flagged as winning, if any.
pub async fn get_winning_bid(
    db_manager: &DatabaseManager,
    listing_id: i64,
) -> Result<Option<Bid>, SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Bid>(queries::GET_WINNING_BID)
                    .bind(listing_id)
                    .fetch_optional(&mut **tx)
                    .await
            })
        })
        .await
}

/// Spendable balance for a profile. None when the profile does not exist.
pub async fn get_balance(
    db_manager: &DatabaseManager,
    user_id: i64,
) -> Result<Option<i64>, SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, i64>(queries::GET_BALANCE)
                    .bind(user_id)
                    .fetch_optional(&mut **tx)
                    .await
            })
        })
        .await
}

/// Audit-trail rows for a user, newest first.
pub async fn get_user_transactions(
    db_manager: &DatabaseManager,
    user_id: i64,
) -> Result<Vec<LedgerEntry>, SqlxError> {
    info!("{:<12} --> fetching ledger for user {}", "Query", user_id);
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, LedgerEntry>(queries::GET_USER_TRANSACTIONS)
                    .bind(user_id)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

// endregion: --- Query Handlers
