use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{ensure_amount, Ledger, LedgerError};
use crate::models::{
    accounts::{Account, AccountId, NewAccount},
    referrals::Referral,
    transactions::{Credit, CreditSource, Transaction},
    withdrawals::{
        AdjustmentReason, BalanceAdjustment, NewWithdrawal, Settlement, SettlementOutcome,
        Withdrawal, WithdrawalId, WithdrawalReceipt, WithdrawalStatus,
    },
};

/// Everything owned by one account. The whole record sits behind one lock, so
/// a mutation and the rows it writes land together.
struct AccountRecord {
    account: Account,
    transactions: Vec<Transaction>,
    referrals: Vec<Referral>,
    withdrawals: Vec<Withdrawal>,
    adjustments: Vec<BalanceAdjustment>,
    impressions: HashSet<String>,
}

impl AccountRecord {
    fn new(account: Account) -> Self {
        AccountRecord {
            account,
            transactions: Vec::new(),
            referrals: Vec::new(),
            withdrawals: Vec::new(),
            adjustments: Vec::new(),
            impressions: HashSet::new(),
        }
    }
}

/// Process-local ledger used for development and tests.
pub struct MemoryLedger {
    accounts: DashMap<AccountId, Arc<Mutex<AccountRecord>>>,
    withdrawal_owners: DashMap<WithdrawalId, AccountId>,
    sequence: AtomicI64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger {
            accounts: DashMap::new(),
            withdrawal_owners: DashMap::new(),
            sequence: AtomicI64::new(1),
        }
    }

    fn record(&self, id: AccountId) -> Option<Arc<Mutex<AccountRecord>>> {
        self.accounts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn existing(&self, id: AccountId) -> Result<Arc<Mutex<AccountRecord>>, LedgerError> {
        self.record(id).ok_or(LedgerError::NotFound(id))
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    #[cfg(test)]
    pub async fn adjustments(&self, id: AccountId) -> Vec<BalanceAdjustment> {
        match self.record(id) {
            Some(record) => record.lock().await.adjustments.clone(),
            None => Vec::new(),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_or_fetch(&self, account: NewAccount) -> Result<Account, LedgerError> {
        if let Some(record) = self.record(account.id) {
            return Ok(record.lock().await.account.clone());
        }

        let referrer = account
            .referrer_id
            .filter(|id| *id != account.id)
            .and_then(|id| self.record(id).map(|record| (id, record)));
        if referrer.is_none() && account.referrer_id.is_some() {
            log::info!(
                "Ignoring referrer {:?} for new account {}.",
                account.referrer_id,
                account.id
            );
        }

        let now = Utc::now();
        let created = Account {
            id: account.id,
            display_name: account.display_name,
            handle: account.handle,
            balance: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            ads_watched: 0,
            referrer_id: referrer.as_ref().map(|(id, _)| *id),
            referrals_count: 0,
            created_at: now,
            updated_at: now,
        };

        let inserted = match self.accounts.entry(created.id) {
            Entry::Occupied(entry) => Err(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(AccountRecord::new(created.clone()))));
                Ok(())
            }
        };
        if let Err(record) = inserted {
            return Ok(record.lock().await.account.clone());
        }

        if let Some((_, record)) = referrer {
            let mut record = record.lock().await;
            record.account.referrals_count += 1;
            record.account.updated_at = now;
            record.referrals.push(Referral {
                referred_id: created.id,
                handle: created.handle.clone(),
                display_name: created.display_name.clone(),
                bonus_earned: Decimal::ZERO,
                joined_at: now,
            });
        }

        Ok(created)
    }

    async fn fetch(&self, id: AccountId) -> Result<Account, LedgerError> {
        let record = self.existing(id)?;
        let account = record.lock().await.account.clone();

        Ok(account)
    }

    async fn credit(&self, credit: Credit) -> Result<Account, LedgerError> {
        ensure_amount(credit.amount)?;

        let record = self.existing(credit.account_id)?;
        let mut record = record.lock().await;

        if let CreditSource::AdView {
            impression_id: Some(impression_id),
            ..
        } = &credit.source
        {
            if !record.impressions.insert(impression_id.clone()) {
                return Err(LedgerError::Conflict(format!(
                    "ad impression {} was already rewarded",
                    impression_id
                )));
            }
        }

        let now = Utc::now();
        record.account.balance += credit.amount;
        record.account.total_earned += credit.amount;
        record.account.updated_at = now;

        match &credit.source {
            CreditSource::AdView { .. } => record.account.ads_watched += 1,
            CreditSource::ReferralBonus { referred_id } => {
                if let Some(referral) = record
                    .referrals
                    .iter_mut()
                    .find(|referral| referral.referred_id == *referred_id)
                {
                    referral.bonus_earned += credit.amount;
                }
            }
        }

        let transaction = Transaction {
            id: self.next_id(),
            account_id: credit.account_id,
            amount: credit.amount,
            kind: credit.source.kind(),
            description: credit.description,
            created_at: now,
        };
        record.transactions.push(transaction);

        Ok(record.account.clone())
    }

    async fn debit(&self, id: AccountId, amount: Decimal) -> Result<Account, LedgerError> {
        ensure_amount(amount)?;

        let record = self.existing(id)?;
        let mut record = record.lock().await;

        if record.account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: record.account.balance,
                requested: amount,
            });
        }

        record.account.balance -= amount;
        record.account.updated_at = Utc::now();

        Ok(record.account.clone())
    }

    async fn transactions(
        &self,
        id: AccountId,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let record = self.existing(id)?;
        let record = record.lock().await;

        Ok(record
            .transactions
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn referrals(&self, id: AccountId, limit: i64) -> Result<Vec<Referral>, LedgerError> {
        let record = self.existing(id)?;
        let record = record.lock().await;

        Ok(record
            .referrals
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn open_withdrawal(
        &self,
        request: NewWithdrawal,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        ensure_amount(request.amount)?;

        let record = self.existing(request.account_id)?;
        let mut record = record.lock().await;

        if record.account.balance < request.amount {
            return Err(LedgerError::InsufficientBalance {
                balance: record.account.balance,
                requested: request.amount,
            });
        }

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: self.next_id(),
            account_id: request.account_id,
            amount: request.amount,
            destination: request.destination,
            status: WithdrawalStatus::Pending,
            failure_reason: None,
            created_at: now,
            processed_at: None,
        };

        record.account.balance -= request.amount;
        record.account.updated_at = now;
        record.withdrawals.push(withdrawal.clone());
        self.withdrawal_owners
            .insert(withdrawal.id, request.account_id);

        Ok(WithdrawalReceipt {
            account: record.account.clone(),
            withdrawal,
        })
    }

    async fn settle_withdrawal(
        &self,
        id: WithdrawalId,
        outcome: SettlementOutcome,
    ) -> Result<Settlement, LedgerError> {
        let owner = self
            .withdrawal_owners
            .get(&id)
            .map(|entry| *entry.value())
            .ok_or(LedgerError::WithdrawalNotFound(id))?;

        let record = self.existing(owner)?;
        let mut guard = record.lock().await;
        let record = &mut *guard;

        let withdrawal = record
            .withdrawals
            .iter_mut()
            .find(|withdrawal| withdrawal.id == id)
            .ok_or(LedgerError::WithdrawalNotFound(id))?;

        if withdrawal.status.is_terminal() {
            return Err(LedgerError::Conflict(format!(
                "withdrawal {} is already {:?}",
                id, withdrawal.status
            )));
        }

        let now = Utc::now();
        withdrawal.status = outcome.status();
        withdrawal.failure_reason = outcome.reason().map(str::to_string);
        withdrawal.processed_at = Some(now);
        let withdrawal = withdrawal.clone();

        if withdrawal.status == WithdrawalStatus::Failed {
            record.account.balance += withdrawal.amount;
            record.account.updated_at = now;
            record.adjustments.push(BalanceAdjustment {
                id: self.next_id(),
                account_id: owner,
                withdrawal_id: withdrawal.id,
                amount: withdrawal.amount,
                reason: AdjustmentReason::WithdrawalRefund,
                created_at: now,
            });
        }

        Ok(Settlement {
            withdrawal,
            account: record.account.clone(),
        })
    }

    async fn withdrawals(
        &self,
        id: AccountId,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, LedgerError> {
        let record = self.existing(id)?;
        let record = record.lock().await;

        Ok(record
            .withdrawals
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
