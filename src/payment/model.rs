use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// region:    --- Rows

/// A two-phase wallet transaction: created `pending` with a verification
/// code, flipped to `completed` exactly once by the verifier, or to
/// `failed` when the balance check rejects a withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentTransaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_type: String,
    pub amount: i64,
    pub fee: i64,
    pub payment_method: String,
    pub phone_number: Option<String>,
    pub account_number: Option<String>,
    pub verification_code: String,
    pub status: String,
    pub request_ip: Option<String>,
    pub user_agent: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Audit-trail row written alongside every balance mutation.
/// Withdrawal amounts are stored negative.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub entry_type: String,
    pub amount: i64,
    pub admin_fee: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Payment transaction states as stored in `payment_transactions.status`.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

// endregion: --- Rows

// region:    --- Enums

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    BankTransfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
        }
    }
}

// endregion: --- Enums
