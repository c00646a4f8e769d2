use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accounts::AccountId;

pub type TransactionId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    AdView,
    ReferralBonus,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    #[serde(serialize_with = "super::normalized")]
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// What a credit is backed by. Ad views and referral bonuses carry the
/// extra rows they write next to the transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum CreditSource {
    AdView {
        block_id: String,
        impression_id: Option<String>,
    },
    ReferralBonus {
        referred_id: AccountId,
    },
}

impl CreditSource {
    pub fn kind(&self) -> TransactionKind {
        match self {
            CreditSource::AdView { .. } => TransactionKind::AdView,
            CreditSource::ReferralBonus { .. } => TransactionKind::ReferralBonus,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Credit {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub source: CreditSource,
    pub description: String,
}
