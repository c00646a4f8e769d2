use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;

use crate::models::{
    accounts::{Account, AccountId, NewAccount},
    referrals::Referral,
    transactions::{Credit, Transaction},
    withdrawals::{
        NewWithdrawal, Settlement, SettlementOutcome, Withdrawal, WithdrawalId,
        WithdrawalReceipt,
    },
};
use crate::settings::{Storage, StorageKind};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    NotFound(AccountId),
    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(WithdrawalId),
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Decimal, requested: Decimal },
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Amount {0} has too many decimal places")]
    TooPrecise(Decimal),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Authoritative store for accounts, credits and withdrawals.
///
/// Every method is applied atomically. Mutations on one account are
/// serialized against each other; different accounts never block each other.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Inserts the account unless it already exists. The referral link is only
    /// stored for a fresh account whose referrer exists and is not itself.
    async fn create_or_fetch(&self, account: NewAccount) -> Result<Account, LedgerError>;

    async fn fetch(&self, id: AccountId) -> Result<Account, LedgerError>;

    /// Adds to `balance` and `total_earned` and appends a transaction.
    async fn credit(&self, credit: Credit) -> Result<Account, LedgerError>;

    /// Takes from `balance` only.
    async fn debit(&self, id: AccountId, amount: Decimal) -> Result<Account, LedgerError>;

    async fn transactions(&self, id: AccountId, limit: i64)
        -> Result<Vec<Transaction>, LedgerError>;

    async fn referrals(&self, id: AccountId, limit: i64) -> Result<Vec<Referral>, LedgerError>;

    /// Debits the account and records the pending withdrawal in one step.
    async fn open_withdrawal(
        &self,
        request: NewWithdrawal,
    ) -> Result<WithdrawalReceipt, LedgerError>;

    /// Moves a pending withdrawal to its terminal status, refunding on failure.
    async fn settle_withdrawal(
        &self,
        id: WithdrawalId,
        outcome: SettlementOutcome,
    ) -> Result<Settlement, LedgerError>;

    async fn withdrawals(&self, id: AccountId, limit: i64)
        -> Result<Vec<Withdrawal>, LedgerError>;
}

/// Decimal places kept by `NUMERIC(20, 9)` columns.
pub const AMOUNT_SCALE: u32 = 9;

fn ensure_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::TooPrecise(amount));
    }

    Ok(())
}

pub async fn connect(storage: &Storage) -> Result<Arc<dyn Ledger>, anyhow::Error> {
    match storage.kind {
        StorageKind::Memory => {
            log::warn!("Using in-memory ledger, balances are lost on restart.");
            Ok(Arc::new(memory::MemoryLedger::new()))
        }
        StorageKind::Postgres => {
            let url = storage
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.url is required for postgres"))?;
            let pool = PgPoolOptions::new()
                .max_connections(storage.max_connections)
                .connect(url)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;
            log::info!("Ledger migrations applied.");

            Ok(Arc::new(postgres::PgLedger::new(pool)))
        }
    }
}
