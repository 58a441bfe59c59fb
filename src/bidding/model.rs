use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Marketplace listing. Auctioned listings carry `is_bid = true`; once
// `is_sold` is set the settlement process never touches the row again.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub id: i64,
    pub name: String,
    pub vendor_id: i64,
    pub is_bid: bool,
    pub starting_bid: i64,
    pub bid_end_time: DateTime<Utc>,
    pub is_sold: bool,
    pub created_at: DateTime<Utc>,
}

// A bid on a listing. Amount and bidder are immutable after insert; only
// the winning flag, deadline and payment status change, and only through
// the settlement process or checkout.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub product_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub is_winning_bid: bool,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
}

/// Bid payment states. Stored as plain text in the `bids` table.
pub mod payment_status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}
