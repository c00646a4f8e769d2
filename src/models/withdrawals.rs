use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accounts::{Account, AccountId};

pub type WithdrawalId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub account_id: AccountId,
    #[serde(serialize_with = "super::normalized")]
    pub amount: Decimal,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewWithdrawal {
    pub account_id: AccountId,
    pub destination: String,
    pub amount: Decimal,
}

/// Body of `/withdraw/request`.
#[derive(Clone, Debug, Deserialize)]
pub struct WithdrawalClaim {
    pub telegram_id: AccountId,
    #[serde(default)]
    pub wallet_address: String,
    pub amount: Decimal,
}

/// The debited account together with the pending request it paid for.
#[derive(Clone, Debug)]
pub struct WithdrawalReceipt {
    pub account: Account,
    pub withdrawal: Withdrawal,
}

#[derive(Clone, Debug, Serialize)]
pub struct WithdrawalResponse {
    pub withdrawal_id: WithdrawalId,
    #[serde(serialize_with = "super::normalized")]
    pub new_balance: Decimal,
    #[serde(serialize_with = "super::normalized")]
    pub amount: Decimal,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub message: String,
}

impl From<WithdrawalReceipt> for WithdrawalResponse {
    fn from(receipt: WithdrawalReceipt) -> Self {
        WithdrawalResponse {
            withdrawal_id: receipt.withdrawal.id,
            new_balance: receipt.account.balance,
            amount: receipt.withdrawal.amount,
            destination: receipt.withdrawal.destination,
            status: receipt.withdrawal.status,
            message: "Withdrawal requested. It is processed within 24 hours.".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Completed,
    Failed { reason: Option<String> },
}

impl SettlementOutcome {
    pub fn status(&self) -> WithdrawalStatus {
        match self {
            SettlementOutcome::Completed => WithdrawalStatus::Completed,
            SettlementOutcome::Failed { .. } => WithdrawalStatus::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SettlementOutcome::Completed => None,
            SettlementOutcome::Failed { reason } => reason.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Settlement {
    pub withdrawal: Withdrawal,
    pub account: Account,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "adjustment_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    WithdrawalRefund,
}

/// Compensating balance change that is not a credit: it never touches
/// `total_earned` and never shows up as a transaction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct BalanceAdjustment {
    pub id: i64,
    pub account_id: AccountId,
    pub withdrawal_id: WithdrawalId,
    #[serde(serialize_with = "super::normalized")]
    pub amount: Decimal,
    pub reason: AdjustmentReason,
    pub created_at: DateTime<Utc>,
}
