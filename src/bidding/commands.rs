//! Bid placement.
//! Runs as a single transaction with the listing row locked, so two
//! concurrent bids on the same listing validate against the same highest
//! bid one after the other. Funds never move here; money is only touched
//! by the payment verifier.
// region:    --- Imports
use crate::bidding::model::{Bid, Listing};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::notify;
use crate::query::queries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

// endregion: --- Imports

// region:    --- Commands

/// Bid request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidCommand {
    pub product_id: i64,
    pub amount: i64,
}

const GET_LISTING_FOR_UPDATE: &str = "SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at FROM products WHERE id = $1 FOR UPDATE";

const INSERT_BID: &str = r#"
    INSERT INTO bids (product_id, bidder_id, amount)
    VALUES ($1, $2, $3)
    RETURNING id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at
"#;

/// Place a bid on an open auction. On success the vendor is messaged and,
/// when a previous highest bidder is displaced, so are they.
pub async fn handle_place_bid(
    cmd: PlaceBidCommand,
    bidder_id: i64,
    db_manager: &DatabaseManager,
) -> Result<Bid, ApiError> {
    info!(
        "{:<12} --> bid of {} on listing {} by user {}",
        "Command", cmd.amount, cmd.product_id, bidder_id
    );

    db_manager
        .transaction(move |tx| {
            Box::pin(async move {
                let listing = sqlx::query_as::<_, Listing>(GET_LISTING_FOR_UPDATE)
                    .bind(cmd.product_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(ApiError::ListingNotFound)?;

                let previous_highest = sqlx::query_as::<_, Bid>(queries::GET_HIGHEST_BID)
                    .bind(cmd.product_id)
                    .fetch_optional(&mut **tx)
                    .await?;

                validate_bid(
                    &listing,
                    previous_highest.as_ref().map(|b| b.amount),
                    cmd.amount,
                    Utc::now(),
                )?;

                let bid = sqlx::query_as::<_, Bid>(INSERT_BID)
                    .bind(cmd.product_id)
                    .bind(bidder_id)
                    .bind(cmd.amount)
                    .fetch_one(&mut **tx)
                    .await?;

                notify::send_message(
                    tx,
                    bidder_id,
                    listing.vendor_id,
                    Some(listing.id),
                    &format!(
                        "A new bid of {} ZMK has been placed on your product \"{}\".",
                        cmd.amount, listing.name
                    ),
                )
                .await?;

                if let Some(prev) = previous_highest {
                    if prev.bidder_id != bidder_id {
                        notify::send_message(
                            tx,
                            listing.vendor_id,
                            prev.bidder_id,
                            Some(listing.id),
                            &format!(
                                "You have been outbid on \"{}\". The current highest bid is {} ZMK. Place a higher bid to win!",
                                listing.name, cmd.amount
                            ),
                        )
                        .await?;
                    }
                }

                Ok(bid)
            })
        })
        .await
}

/// A bid must land on an open auction and exceed the bar: the current
/// highest bid, or the starting bid when none exist yet.
fn validate_bid(
    listing: &Listing,
    highest_amount: Option<i64>,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if !listing.is_bid {
        return Err(ApiError::NotAnAuction);
    }
    if listing.is_sold || now >= listing.bid_end_time {
        return Err(ApiError::AuctionClosed);
    }
    let minimum = highest_amount.unwrap_or(listing.starting_bid);
    if amount <= minimum {
        return Err(ApiError::BidTooLow { minimum });
    }
    Ok(())
}

// endregion: --- Commands

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_listing() -> Listing {
        Listing {
            id: 1,
            name: "Garden table".to_string(),
            vendor_id: 10,
            is_bid: true,
            starting_bid: 100,
            bid_end_time: Utc::now() + Duration::hours(2),
            is_sold: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rejects_bid_on_non_auction_listing() {
        let listing = Listing {
            is_bid: false,
            ..open_listing()
        };
        let err = validate_bid(&listing, None, 500, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::NotAnAuction));
    }

    #[test]
    fn rejects_bid_after_auction_end() {
        let listing = Listing {
            bid_end_time: Utc::now() - Duration::minutes(1),
            ..open_listing()
        };
        let err = validate_bid(&listing, None, 500, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::AuctionClosed));
    }

    #[test]
    fn rejects_bid_on_sold_listing() {
        let listing = Listing {
            is_sold: true,
            ..open_listing()
        };
        let err = validate_bid(&listing, None, 500, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::AuctionClosed));
    }

    #[test]
    fn first_bid_must_exceed_starting_bid() {
        let listing = open_listing();
        let err = validate_bid(&listing, None, 100, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::BidTooLow { minimum: 100 }));
        assert!(validate_bid(&listing, None, 101, Utc::now()).is_ok());
    }

    #[test]
    fn later_bids_must_exceed_current_highest() {
        let listing = open_listing();
        let err = validate_bid(&listing, Some(250), 250, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::BidTooLow { minimum: 250 }));
        assert!(validate_bid(&listing, Some(250), 251, Utc::now()).is_ok());
    }
}

// endregion: --- Tests
