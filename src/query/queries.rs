/// Listing lookup
pub const GET_LISTING: &str = "SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at FROM products WHERE id = $1";

/// All listings, newest first
pub const GET_ALL_LISTINGS: &str = "SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at FROM products ORDER BY created_at DESC";

/// Bids on a listing, best first (ties broken by earliest bid)
pub const GET_LISTING_BIDS: &str = r#"
    SELECT id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at
    FROM bids
    WHERE product_id = $1
    ORDER BY amount DESC, id ASC
"#;

/// Current highest bid on a listing
pub const GET_HIGHEST_BID: &str = r#"
    SELECT id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at
    FROM bids
    WHERE product_id = $1
    ORDER BY amount DESC, id ASC
    LIMIT 1
"#;

/// Bid currently flagged as winning, if any
pub const GET_WINNING_BID: &str = r#"
    SELECT id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at
    FROM bids
    WHERE product_id = $1 AND is_winning_bid
"#;

/// Spendable balance of a profile
pub const GET_BALANCE: &str = "SELECT balance FROM profiles WHERE id = $1";

/// Audit-trail rows for a user, newest first
pub const GET_USER_TRANSACTIONS: &str = r#"
    SELECT id, user_id, type, amount, admin_fee, description, created_at
    FROM transactions
    WHERE user_id = $1
    ORDER BY created_at DESC
"#;
