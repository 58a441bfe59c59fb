//! Two-phase deposit/withdrawal protocol.
//! `handle_initiate_payment` records intent and hands out a one-time code;
//! `handle_verify_payment` is the only place in the service where a balance
//! changes, and it does so in a single transaction with the rows locked.
// region:    --- Imports
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::payment::code::{generate_verification_code, CodeDelivery};
use crate::payment::model::{status, PaymentMethod, PaymentTransaction, TransactionType};
use crate::query;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Commands

/// Initiation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentCommand {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub fee: i64,
    pub payment_method: PaymentMethod,
    pub phone_number: Option<String>,
    pub account_number: Option<String>,
}

/// Verification request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentCommand {
    pub transaction_id: i64,
    pub verification_code: String,
}

/// Where the initiation request came from; stored with the pending row.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

// endregion: --- Commands

// region:    --- SQL

const INSERT_PAYMENT_TRANSACTION: &str = r#"
    INSERT INTO payment_transactions
        (user_id, transaction_type, amount, fee, payment_method,
         phone_number, account_number, verification_code, status,
         request_ip, user_agent)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10)
    RETURNING id
"#;

const GET_TRANSACTION_FOR_UPDATE: &str = r#"
    SELECT id, user_id, transaction_type, amount, fee, payment_method,
           phone_number, account_number, verification_code, status,
           request_ip, user_agent, verified_at, completed_at, created_at
    FROM payment_transactions
    WHERE id = $1 AND user_id = $2
    FOR UPDATE
"#;

const GET_BALANCE_FOR_UPDATE: &str = "SELECT balance FROM profiles WHERE id = $1 FOR UPDATE";

const UPDATE_BALANCE: &str = "UPDATE profiles SET balance = $1 WHERE id = $2";

const MARK_TRANSACTION_COMPLETED: &str =
    "UPDATE payment_transactions SET status = 'completed', verified_at = $1, completed_at = $1 WHERE id = $2";

const MARK_TRANSACTION_FAILED: &str =
    "UPDATE payment_transactions SET status = 'failed', verified_at = $1 WHERE id = $2";

const INSERT_LEDGER_ENTRY: &str = r#"
    INSERT INTO transactions (user_id, type, amount, admin_fee, description)
    VALUES ($1, $2, $3, $4, $5)
"#;

// endregion: --- SQL

// region:    --- Initiation

/// Open a pending deposit or withdrawal carrying a fresh verification code.
/// No balance is reserved here; the withdrawal precheck is advisory and the
/// verifier repeats it authoritatively under a row lock.
pub async fn handle_initiate_payment(
    cmd: InitiatePaymentCommand,
    user_id: i64,
    origin: RequestOrigin,
    db_manager: &DatabaseManager,
    delivery: &dyn CodeDelivery,
) -> Result<i64, ApiError> {
    info!(
        "{:<12} --> {} of {} (fee {}) initiated by user {}",
        "Payment",
        cmd.transaction_type.as_str(),
        cmd.amount,
        cmd.fee,
        user_id
    );

    validate_initiation(&cmd)?;

    if cmd.transaction_type == TransactionType::Withdrawal {
        let balance = query::handlers::get_balance(db_manager, user_id)
            .await?
            .unwrap_or(0);
        if balance < cmd.amount + cmd.fee {
            return Err(ApiError::InsufficientBalance);
        }
    }

    let code = generate_verification_code();
    let stored_code = code.clone();
    let transaction_id = db_manager
        .transaction(move |tx| {
            Box::pin(async move {
                let id = sqlx::query_scalar::<_, i64>(INSERT_PAYMENT_TRANSACTION)
                    .bind(user_id)
                    .bind(cmd.transaction_type.as_str())
                    .bind(cmd.amount)
                    .bind(cmd.fee)
                    .bind(cmd.payment_method.as_str())
                    .bind(&cmd.phone_number)
                    .bind(&cmd.account_number)
                    .bind(&stored_code)
                    .bind(&origin.ip)
                    .bind(&origin.user_agent)
                    .fetch_one(&mut **tx)
                    .await?;
                Ok::<_, ApiError>(id)
            })
        })
        .await?;

    if let Err(e) = delivery.send_code(user_id, &code).await {
        warn!(
            "{:<12} --> code delivery failed for transaction {}: {}",
            "Payment", transaction_id, e
        );
    }

    Ok(transaction_id)
}

fn validate_initiation(cmd: &InitiatePaymentCommand) -> Result<(), ApiError> {
    if cmd.amount <= 0 || cmd.fee < 0 {
        return Err(ApiError::InvalidAmount);
    }
    if cmd.transaction_type == TransactionType::Withdrawal
        && cmd.payment_method == PaymentMethod::Card
    {
        return Err(ApiError::InvalidPaymentMethod);
    }
    let has = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
    match cmd.payment_method {
        PaymentMethod::MobileMoney if !has(&cmd.phone_number) => Err(ApiError::MissingContact),
        PaymentMethod::BankTransfer if !has(&cmd.account_number) => Err(ApiError::MissingContact),
        _ => Ok(()),
    }
}

// endregion: --- Initiation

// region:    --- Verification

enum VerifyOutcome {
    Completed { transaction_type: String },
    InsufficientBalance,
}

/// Confirm a pending transaction with its code and apply the balance change.
/// Everything runs in one transaction: the status flip, the balance write
/// and the audit row all persist together or not at all. A withdrawal that
/// would overdraw the balance commits only a terminal `failed` status.
pub async fn handle_verify_payment(
    cmd: VerifyPaymentCommand,
    user_id: i64,
    db_manager: &DatabaseManager,
) -> Result<String, ApiError> {
    info!(
        "{:<12} --> verifying transaction {} for user {}",
        "Payment", cmd.transaction_id, user_id
    );

    let outcome = db_manager
        .transaction(move |tx| {
            Box::pin(async move {
                let txn = sqlx::query_as::<_, PaymentTransaction>(GET_TRANSACTION_FOR_UPDATE)
                    .bind(cmd.transaction_id)
                    .bind(user_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(ApiError::TransactionNotFound)?;

                check_verification(&txn.status, &txn.verification_code, &cmd.verification_code)?;

                let kind = TransactionType::parse(&txn.transaction_type).ok_or_else(|| {
                    ApiError::Database(sqlx::Error::Protocol(format!(
                        "unknown transaction type: {}",
                        txn.transaction_type
                    )))
                })?;

                let now = Utc::now();
                let balance = sqlx::query_scalar::<_, i64>(GET_BALANCE_FOR_UPDATE)
                    .bind(user_id)
                    .fetch_one(&mut **tx)
                    .await?;

                let new_balance = match apply_to_balance(balance, kind, txn.amount, txn.fee) {
                    Ok(b) => b,
                    Err(ApiError::InsufficientBalance) => {
                        // terminal state, committed: the code cannot be
                        // replayed against a balance that will never cover it
                        sqlx::query(MARK_TRANSACTION_FAILED)
                            .bind(now)
                            .bind(txn.id)
                            .execute(&mut **tx)
                            .await?;
                        return Ok(VerifyOutcome::InsufficientBalance);
                    }
                    Err(e) => return Err(e),
                };

                sqlx::query(UPDATE_BALANCE)
                    .bind(new_balance)
                    .bind(user_id)
                    .execute(&mut **tx)
                    .await?;

                let (audit_amount, description) = match kind {
                    TransactionType::Deposit => {
                        (txn.amount, format!("Deposit via {}", txn.payment_method))
                    }
                    TransactionType::Withdrawal => {
                        (-txn.amount, format!("Withdrawal via {}", txn.payment_method))
                    }
                };
                sqlx::query(INSERT_LEDGER_ENTRY)
                    .bind(user_id)
                    .bind(kind.as_str())
                    .bind(audit_amount)
                    .bind(txn.fee)
                    .bind(&description)
                    .execute(&mut **tx)
                    .await?;

                sqlx::query(MARK_TRANSACTION_COMPLETED)
                    .bind(now)
                    .bind(txn.id)
                    .execute(&mut **tx)
                    .await?;

                info!(
                    "{:<12} --> transaction {} completed, balance {} -> {}",
                    "Payment", txn.id, balance, new_balance
                );

                Ok(VerifyOutcome::Completed {
                    transaction_type: txn.transaction_type,
                })
            })
        })
        .await?;

    match outcome {
        VerifyOutcome::Completed { transaction_type } => Ok(transaction_type),
        VerifyOutcome::InsufficientBalance => Err(ApiError::InsufficientBalance),
    }
}

/// Verification preconditions, in order: the row must still be pending
/// (replays after success are rejected, not re-applied), and the submitted
/// code must match the stored one exactly.
fn check_verification(
    current_status: &str,
    stored_code: &str,
    submitted_code: &str,
) -> Result<(), ApiError> {
    if current_status != status::PENDING {
        return Err(ApiError::AlreadyProcessed);
    }
    if stored_code != submitted_code {
        return Err(ApiError::InvalidCode);
    }
    Ok(())
}

/// New balance after applying the transaction. A withdrawal may not drive
/// the balance negative.
fn apply_to_balance(
    balance: i64,
    kind: TransactionType,
    amount: i64,
    fee: i64,
) -> Result<i64, ApiError> {
    match kind {
        TransactionType::Deposit => Ok(balance + amount),
        TransactionType::Withdrawal => {
            let next = balance - amount - fee;
            if next < 0 {
                Err(ApiError::InsufficientBalance)
            } else {
                Ok(next)
            }
        }
    }
}

// endregion: --- Verification

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn withdrawal_cmd() -> InitiatePaymentCommand {
        InitiatePaymentCommand {
            transaction_type: TransactionType::Withdrawal,
            amount: 200,
            fee: 50,
            payment_method: PaymentMethod::MobileMoney,
            phone_number: Some("0977000111".to_string()),
            account_number: None,
        }
    }

    #[test]
    fn initiation_rejects_non_positive_amount() {
        let cmd = InitiatePaymentCommand {
            amount: 0,
            ..withdrawal_cmd()
        };
        assert!(matches!(
            validate_initiation(&cmd),
            Err(ApiError::InvalidAmount)
        ));
    }

    #[test]
    fn initiation_rejects_negative_fee() {
        let cmd = InitiatePaymentCommand {
            fee: -1,
            ..withdrawal_cmd()
        };
        assert!(matches!(
            validate_initiation(&cmd),
            Err(ApiError::InvalidAmount)
        ));
    }

    #[test]
    fn card_withdrawals_are_not_supported() {
        let cmd = InitiatePaymentCommand {
            payment_method: PaymentMethod::Card,
            ..withdrawal_cmd()
        };
        assert!(matches!(
            validate_initiation(&cmd),
            Err(ApiError::InvalidPaymentMethod)
        ));
    }

    #[test]
    fn mobile_money_requires_a_phone_number() {
        let cmd = InitiatePaymentCommand {
            phone_number: None,
            ..withdrawal_cmd()
        };
        assert!(matches!(
            validate_initiation(&cmd),
            Err(ApiError::MissingContact)
        ));
    }

    #[test]
    fn bank_transfer_requires_an_account_number() {
        let cmd = InitiatePaymentCommand {
            payment_method: PaymentMethod::BankTransfer,
            account_number: Some("  ".to_string()),
            ..withdrawal_cmd()
        };
        assert!(matches!(
            validate_initiation(&cmd),
            Err(ApiError::MissingContact)
        ));
    }

    #[test]
    fn card_deposit_needs_no_contact_details() {
        let cmd = InitiatePaymentCommand {
            transaction_type: TransactionType::Deposit,
            payment_method: PaymentMethod::Card,
            phone_number: None,
            account_number: None,
            ..withdrawal_cmd()
        };
        assert!(validate_initiation(&cmd).is_ok());
    }

    #[test]
    fn verification_rejects_replay_before_checking_the_code() {
        let err = check_verification(status::COMPLETED, "123456", "123456").unwrap_err();
        assert!(matches!(err, ApiError::AlreadyProcessed));
        let err = check_verification(status::FAILED, "123456", "000000").unwrap_err();
        assert!(matches!(err, ApiError::AlreadyProcessed));
    }

    #[test]
    fn verification_rejects_wrong_code() {
        let err = check_verification(status::PENDING, "123456", "123457").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
        assert!(check_verification(status::PENDING, "123456", "123456").is_ok());
    }

    #[test]
    fn deposit_adds_exactly_the_amount() {
        assert_eq!(
            apply_to_balance(1000, TransactionType::Deposit, 200, 50).unwrap(),
            1200
        );
    }

    #[test]
    fn withdrawal_subtracts_amount_and_fee() {
        assert_eq!(
            apply_to_balance(1000, TransactionType::Withdrawal, 200, 50).unwrap(),
            750
        );
    }

    #[test]
    fn withdrawal_may_drain_the_balance_to_zero_but_not_below() {
        assert_eq!(
            apply_to_balance(250, TransactionType::Withdrawal, 200, 50).unwrap(),
            0
        );
        let err = apply_to_balance(249, TransactionType::Withdrawal, 200, 50).unwrap_err();
        assert!(matches!(err, ApiError::InsufficientBalance));
    }
}

// endregion: --- Tests
