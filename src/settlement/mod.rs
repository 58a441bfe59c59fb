//! Auction settlement.
//! A scheduled pass over every auction whose window has closed but which is
//! not yet sold: promote the best bid to winner with a payment deadline,
//! and when a winner misses that deadline, penalize them and advance the
//! runner-up. Each listing settles in its own transaction so one bad row
//! never stalls the batch.
// region:    --- Imports
use crate::bidding::model::{payment_status, Bid, Listing};
use crate::notify;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info};

// endregion: --- Imports

// region:    --- Constants

/// Hours a promoted winner has to pay.
pub const PAYMENT_WINDOW_HOURS: i64 = 48;

/// Days a non-paying winner is suspended for.
pub const SUSPENSION_DAYS: i64 = 7;

/// Window ahead of `bid_end_time` in which closing reminders go out.
const REMINDER_WINDOW_HOURS: i64 = 1;

const DEFAULT_INTERVAL_SECS: u64 = 300;

// endregion: --- Constants

// region:    --- SQL

const GET_EXPIRED_AUCTIONS: &str = r#"
    SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at
    FROM products
    WHERE is_bid AND bid_end_time <= $1 AND NOT is_sold
"#;

const GET_LISTING_FOR_SETTLEMENT: &str = r#"
    SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at
    FROM products
    WHERE id = $1 AND NOT is_sold
    FOR UPDATE
"#;

const GET_BIDS_FOR_SETTLEMENT: &str = r#"
    SELECT id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at
    FROM bids
    WHERE product_id = $1
    FOR UPDATE
"#;

const PROMOTE_BID: &str = r#"
    UPDATE bids SET is_winning_bid = TRUE, payment_deadline = $1
    WHERE id = $2 AND is_winning_bid = FALSE AND payment_status = 'pending'
"#;

const FAIL_BID: &str = r#"
    UPDATE bids SET payment_status = 'failed', is_winning_bid = FALSE
    WHERE id = $1 AND payment_status = 'pending'
"#;

const INSERT_SUSPENSION: &str = r#"
    INSERT INTO user_moderation (user_id, status, reason, expires_at, moderated_by)
    VALUES ($1, 'suspended', $2, $3, $4)
"#;

const GET_CLOSING_AUCTIONS: &str = r#"
    SELECT id, name, vendor_id, is_bid, starting_bid, bid_end_time, is_sold, created_at
    FROM products
    WHERE is_bid AND NOT is_sold AND bid_end_time >= $1 AND bid_end_time <= $2
"#;

// endregion: --- SQL

// region:    --- Scheduler

/// Periodic settlement driver. The same pass is also exposed over HTTP for
/// on-demand runs; both paths go through `settle_expired_auctions`.
pub struct SettlementScheduler {
    pool: Arc<PgPool>,
}

impl SettlementScheduler {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Spawn the settlement loop. Interval comes from
    /// `SETTLEMENT_INTERVAL_SECS`, default 300.
    pub async fn start(&self) {
        let pool = Arc::clone(&self.pool);
        let secs = std::env::var("SETTLEMENT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        info!(
            "{:<12} --> settlement loop running every {}s",
            "Scheduler", secs
        );
        tokio::spawn(async move {
            let mut interval = interval(TokioDuration::from_secs(secs));
            loop {
                interval.tick().await;
                match settle_expired_auctions(&pool).await {
                    Ok(n) => debug!("{:<12} --> settled {} listings", "Scheduler", n),
                    Err(e) => error!("{:<12} --> settlement pass failed: {:?}", "Scheduler", e),
                }
            }
        });
    }
}

// endregion: --- Scheduler

// region:    --- Settlement Decision

/// What one settlement pass must do to a single listing, decided purely
/// from the listing's bids and the clock.
#[derive(Debug, PartialEq, Eq)]
pub enum SettlementAction {
    /// Nothing to act on: no bids, or every bid already failed.
    Skip,
    /// First promotion of the best bid.
    PromoteInitial {
        bid_id: i64,
        bidder_id: i64,
        amount: i64,
    },
    /// A winner exists and the state requires no change.
    AwaitPayment,
    /// The winner missed the payment deadline: fail it and, when a
    /// candidate remains, promote the runner-up.
    FailAndAdvance {
        failed_bid_id: i64,
        failed_bidder_id: i64,
        next: Option<NextWinner>,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub struct NextWinner {
    pub bid_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
}

/// Rank bids best-first: highest amount, ties broken by lowest bid id
/// (the earliest-placed bid wins a tie).
pub fn rank_bids(bids: &[Bid]) -> Vec<&Bid> {
    let mut ranked: Vec<&Bid> = bids.iter().collect();
    ranked.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.id.cmp(&b.id)));
    ranked
}

/// Decide the settlement action for one expired listing.
///
/// Replays are no-ops by construction: a winner inside its deadline, a
/// winner already failed or completed, and a listing whose bids are all
/// failed each map to an action that mutates nothing.
pub fn decide_settlement(bids: &[Bid], now: DateTime<Utc>) -> SettlementAction {
    if bids.is_empty() {
        return SettlementAction::Skip;
    }
    let ranked = rank_bids(bids);

    if let Some(current) = bids.iter().find(|b| b.is_winning_bid) {
        let deadline_passed = current.payment_deadline.map_or(false, |d| d < now);
        if !deadline_passed || current.payment_status != payment_status::PENDING {
            return SettlementAction::AwaitPayment;
        }
        let next = ranked
            .iter()
            .find(|b| {
                b.id != current.id
                    && !b.is_winning_bid
                    && b.payment_status == payment_status::PENDING
            })
            .map(|b| NextWinner {
                bid_id: b.id,
                bidder_id: b.bidder_id,
                amount: b.amount,
            });
        return SettlementAction::FailAndAdvance {
            failed_bid_id: current.id,
            failed_bidder_id: current.bidder_id,
            next,
        };
    }

    match ranked
        .iter()
        .find(|b| b.payment_status == payment_status::PENDING)
    {
        Some(top) => SettlementAction::PromoteInitial {
            bid_id: top.id,
            bidder_id: top.bidder_id,
            amount: top.amount,
        },
        None => SettlementAction::Skip,
    }
}

// endregion: --- Settlement Decision

// region:    --- Settlement Pass

/// Resolve every listing whose auction window has closed. Returns the
/// number of listings settled without error; per-listing failures are
/// logged and retried from persisted state on the next pass.
pub async fn settle_expired_auctions(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    let listings = sqlx::query_as::<_, Listing>(GET_EXPIRED_AUCTIONS)
        .bind(now)
        .fetch_all(pool)
        .await?;

    let mut processed = 0u64;
    for listing in &listings {
        match settle_listing(pool, listing, now).await {
            Ok(()) => processed += 1,
            Err(e) => {
                error!(
                    "{:<12} --> failed to settle listing {}: {:?}",
                    "Settlement", listing.id, e
                );
            }
        }
    }
    Ok(processed)
}

/// Settle one listing inside its own transaction. The product row is
/// locked for the duration, which serializes overlapping schedule ticks on
/// the same listing; the state guards in the UPDATEs make the loser of
/// that race a no-op.
async fn settle_listing(
    pool: &PgPool,
    listing: &Listing,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    // re-read under the lock; a concurrent tick may have sold it meanwhile
    let locked = sqlx::query_as::<_, Listing>(GET_LISTING_FOR_SETTLEMENT)
        .bind(listing.id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(listing) = locked else {
        tx.rollback().await?;
        return Ok(());
    };

    let bids = sqlx::query_as::<_, Bid>(GET_BIDS_FOR_SETTLEMENT)
        .bind(listing.id)
        .fetch_all(&mut *tx)
        .await?;

    match decide_settlement(&bids, now) {
        SettlementAction::Skip | SettlementAction::AwaitPayment => {
            tx.rollback().await?;
        }
        SettlementAction::PromoteInitial {
            bid_id,
            bidder_id,
            amount,
        } => {
            let promoted = promote_bid(&mut tx, bid_id, now).await?;
            if promoted {
                notify::send_message(
                    &mut tx,
                    listing.vendor_id,
                    bidder_id,
                    Some(listing.id),
                    &format!(
                        "Congratulations! You won the bid for \"{}\" at {} ZMK. Please complete payment within {} hours to secure your purchase.",
                        listing.name, amount, PAYMENT_WINDOW_HOURS
                    ),
                )
                .await?;
                notify::send_notification(
                    &mut tx,
                    listing.vendor_id,
                    Some(listing.id),
                    "bid_won",
                    "Bid Completed",
                    &format!(
                        "Your product \"{}\" sold to a bidder for {} ZMK.",
                        listing.name, amount
                    ),
                )
                .await?;
                info!(
                    "{:<12} --> listing {}: bid {} promoted to winner at {}",
                    "Settlement", listing.id, bid_id, amount
                );
            }
            tx.commit().await?;
        }
        SettlementAction::FailAndAdvance {
            failed_bid_id,
            failed_bidder_id,
            next,
        } => {
            let failed = sqlx::query(FAIL_BID)
                .bind(failed_bid_id)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                == 1;
            if failed {
                sqlx::query(INSERT_SUSPENSION)
                    .bind(failed_bidder_id)
                    .bind(format!(
                        "Failed to pay for winning bid within {} hours",
                        PAYMENT_WINDOW_HOURS
                    ))
                    .bind(now + Duration::days(SUSPENSION_DAYS))
                    .bind(listing.vendor_id)
                    .execute(&mut *tx)
                    .await?;
                notify::send_message(
                    &mut tx,
                    listing.vendor_id,
                    failed_bidder_id,
                    Some(listing.id),
                    &format!(
                        "You have been temporarily suspended for failing to pay for your winning bid on \"{}\" within {} hours. Your account will be restored in {} days.",
                        listing.name, PAYMENT_WINDOW_HOURS, SUSPENSION_DAYS
                    ),
                )
                .await?;
                info!(
                    "{:<12} --> listing {}: bid {} failed payment, bidder {} suspended",
                    "Settlement", listing.id, failed_bid_id, failed_bidder_id
                );

                if let Some(next) = next {
                    let promoted = promote_bid(&mut tx, next.bid_id, now).await?;
                    if promoted {
                        notify::send_message(
                            &mut tx,
                            listing.vendor_id,
                            next.bidder_id,
                            Some(listing.id),
                            &format!(
                                "Congratulations! You are now the winning bidder for \"{}\" at {} ZMK. The previous winner failed to pay. Are you still interested? Please confirm within {} hours.",
                                listing.name, next.amount, PAYMENT_WINDOW_HOURS
                            ),
                        )
                        .await?;
                        info!(
                            "{:<12} --> listing {}: runner-up bid {} promoted",
                            "Settlement", listing.id, next.bid_id
                        );
                    }
                }
            }
            tx.commit().await?;
        }
    }

    Ok(())
}

/// Flag a bid as winning with a fresh payment deadline. Returns false when
/// the guard matched nothing (already winning or no longer pending), in
/// which case no notifications should be sent.
async fn promote_bid(
    tx: &mut Transaction<'_, Postgres>,
    bid_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let deadline = now + Duration::hours(PAYMENT_WINDOW_HOURS);
    let updated = sqlx::query(PROMOTE_BID)
        .bind(deadline)
        .bind(bid_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    Ok(updated == 1)
}

// endregion: --- Settlement Pass

// region:    --- Closing Reminders

/// Notify every trailing bidder on auctions ending within the next hour.
/// Triggered externally (at most hourly); not part of the settlement loop.
pub async fn send_closing_reminders(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    let cutoff = now + Duration::hours(REMINDER_WINDOW_HOURS);
    let listings = sqlx::query_as::<_, Listing>(GET_CLOSING_AUCTIONS)
        .bind(now)
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

    let mut processed = 0u64;
    for listing in &listings {
        let bids = sqlx::query_as::<_, Bid>(
            "SELECT id, product_id, bidder_id, amount, is_winning_bid, payment_deadline, payment_status, created_at FROM bids WHERE product_id = $1",
        )
        .bind(listing.id)
        .fetch_all(pool)
        .await?;
        if bids.is_empty() {
            continue;
        }

        let ranked = rank_bids(&bids);
        let highest = ranked[0];

        let mut tx = pool.begin().await?;
        for bid in ranked.iter().skip(1) {
            notify::send_notification(
                &mut tx,
                bid.bidder_id,
                Some(listing.id),
                "bid_ending",
                "Bid Ending Soon!",
                &format!(
                    "The bid for \"{}\" ends in 1 hour. Current highest bid: {} ZMK. Increase your bid to win!",
                    listing.name, highest.amount
                ),
            )
            .await?;
        }
        tx.commit().await?;
        processed += 1;
    }
    Ok(processed)
}

// endregion: --- Closing Reminders

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(id: i64, bidder_id: i64, amount: i64) -> Bid {
        Bid {
            id,
            product_id: 1,
            bidder_id,
            amount,
            is_winning_bid: false,
            payment_deadline: None,
            payment_status: payment_status::PENDING.to_string(),
            created_at: Utc::now(),
        }
    }

    fn winning(mut b: Bid, deadline: DateTime<Utc>) -> Bid {
        b.is_winning_bid = true;
        b.payment_deadline = Some(deadline);
        b
    }

    #[test]
    fn no_bids_means_skip() {
        assert_eq!(decide_settlement(&[], Utc::now()), SettlementAction::Skip);
    }

    #[test]
    fn first_pass_promotes_the_highest_bid() {
        // A: 100, B: 150, C: 120 — B must win
        let bids = vec![bid(1, 10, 100), bid(2, 20, 150), bid(3, 30, 120)];
        assert_eq!(
            decide_settlement(&bids, Utc::now()),
            SettlementAction::PromoteInitial {
                bid_id: 2,
                bidder_id: 20,
                amount: 150
            }
        );
    }

    #[test]
    fn equal_amounts_go_to_the_earliest_bid() {
        let bids = vec![bid(5, 50, 200), bid(3, 30, 200), bid(7, 70, 150)];
        assert_eq!(
            decide_settlement(&bids, Utc::now()),
            SettlementAction::PromoteInitial {
                bid_id: 3,
                bidder_id: 30,
                amount: 200
            }
        );
    }

    #[test]
    fn winner_inside_deadline_is_left_alone() {
        let now = Utc::now();
        let bids = vec![
            bid(1, 10, 100),
            winning(bid(2, 20, 150), now + Duration::hours(12)),
        ];
        assert_eq!(decide_settlement(&bids, now), SettlementAction::AwaitPayment);
    }

    #[test]
    fn winner_who_already_paid_is_left_alone() {
        let now = Utc::now();
        let mut paid = winning(bid(2, 20, 150), now - Duration::hours(1));
        paid.payment_status = payment_status::COMPLETED.to_string();
        let bids = vec![bid(1, 10, 100), paid];
        assert_eq!(decide_settlement(&bids, now), SettlementAction::AwaitPayment);
    }

    #[test]
    fn missed_deadline_fails_winner_and_advances_runner_up() {
        // A: 100, B: 150 (winner, deadline missed), C: 120
        let now = Utc::now();
        let bids = vec![
            bid(1, 10, 100),
            winning(bid(2, 20, 150), now - Duration::hours(1)),
            bid(3, 30, 120),
        ];
        assert_eq!(
            decide_settlement(&bids, now),
            SettlementAction::FailAndAdvance {
                failed_bid_id: 2,
                failed_bidder_id: 20,
                next: Some(NextWinner {
                    bid_id: 3,
                    bidder_id: 30,
                    amount: 120
                })
            }
        );
    }

    #[test]
    fn missed_deadline_with_no_other_bid_advances_nobody() {
        let now = Utc::now();
        let bids = vec![winning(bid(2, 20, 150), now - Duration::hours(1))];
        assert_eq!(
            decide_settlement(&bids, now),
            SettlementAction::FailAndAdvance {
                failed_bid_id: 2,
                failed_bidder_id: 20,
                next: None
            }
        );
    }

    #[test]
    fn previously_failed_bids_are_never_re_promoted() {
        let now = Utc::now();
        let mut failed = bid(2, 20, 150);
        failed.payment_status = payment_status::FAILED.to_string();
        // highest remaining pending bid wins, not the failed 150
        let bids = vec![bid(1, 10, 100), failed, bid(3, 30, 120)];
        assert_eq!(
            decide_settlement(&bids, now),
            SettlementAction::PromoteInitial {
                bid_id: 3,
                bidder_id: 30,
                amount: 120
            }
        );
    }

    #[test]
    fn all_bids_failed_means_skip() {
        let mut a = bid(1, 10, 100);
        a.payment_status = payment_status::FAILED.to_string();
        let mut b = bid(2, 20, 150);
        b.payment_status = payment_status::FAILED.to_string();
        assert_eq!(
            decide_settlement(&[a, b], Utc::now()),
            SettlementAction::Skip
        );
    }

    #[test]
    fn replay_after_runner_up_promotion_is_a_no_op() {
        // state after a fail-and-advance pass: old winner failed and
        // unflagged, runner-up winning with a fresh deadline
        let now = Utc::now();
        let mut old_winner = bid(2, 20, 150);
        old_winner.payment_status = payment_status::FAILED.to_string();
        let bids = vec![
            bid(1, 10, 100),
            old_winner,
            winning(bid(3, 30, 120), now + Duration::hours(48)),
        ];
        assert_eq!(decide_settlement(&bids, now), SettlementAction::AwaitPayment);
    }

    #[test]
    fn ranking_orders_by_amount_then_bid_id() {
        let bids = vec![bid(4, 40, 120), bid(2, 20, 150), bid(9, 90, 150)];
        let ranked = rank_bids(&bids);
        let ids: Vec<i64> = ranked.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 9, 4]);
    }
}

// endregion: --- Tests
