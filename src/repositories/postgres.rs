use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};

use super::{ensure_amount, Ledger, LedgerError};
use crate::models::{
    accounts::{Account, AccountId, NewAccount},
    referrals::Referral,
    transactions::{Credit, CreditSource, Transaction},
    withdrawals::{
        AdjustmentReason, NewWithdrawal, Settlement, SettlementOutcome, Withdrawal, WithdrawalId,
        WithdrawalReceipt, WithdrawalStatus,
    },
};

#[derive(Clone)]
pub struct PgLedger {
    conn: PgPool,
}

impl PgLedger {
    pub fn new(conn: PgPool) -> Self {
        PgLedger { conn }
    }

    async fn ensure_exists(&self, id: AccountId) -> Result<(), LedgerError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.conn)
            .await?;

        if !exists {
            return Err(LedgerError::NotFound(id));
        }

        Ok(())
    }
}

async fn lock_account(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: AccountId,
) -> Result<Account, LedgerError> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::NotFound(id))
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create_or_fetch(&self, account: NewAccount) -> Result<Account, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let existing = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account.id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(existing) = existing {
            tx.commit().await?;
            return Ok(existing);
        }

        let referrer_id = match account.referrer_id.filter(|id| *id != account.id) {
            Some(referrer_id) => {
                sqlx::query_scalar::<_, i64>("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(referrer_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };
        if referrer_id.is_none() && account.referrer_id.is_some() {
            log::info!(
                "Ignoring referrer {:?} for new account {}.",
                account.referrer_id,
                account.id
            );
        }

        let created = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, display_name, handle, referrer_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(&account.display_name)
        .bind(&account.handle)
        .bind(referrer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let created = match created {
            Some(created) => created,
            None => {
                // Lost the race against a concurrent first visit.
                tx.rollback().await?;
                return self.fetch(account.id).await;
            }
        };

        if let Some(referrer_id) = referrer_id {
            sqlx::query("INSERT INTO referrals (referrer_id, referred_id) VALUES ($1, $2)")
                .bind(referrer_id)
                .bind(created.id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                UPDATE accounts
                SET referrals_count = referrals_count + 1, updated_at = CURRENT_TIMESTAMP
                WHERE id = $1
                "#,
            )
            .bind(referrer_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(created)
    }

    async fn fetch(&self, id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.conn)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    async fn credit(&self, credit: Credit) -> Result<Account, LedgerError> {
        ensure_amount(credit.amount)?;

        let ads_increment: i64 = match credit.source {
            CreditSource::AdView { .. } => 1,
            CreditSource::ReferralBonus { .. } => 0,
        };

        let mut tx = self.conn.begin().await?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance + $2,
                total_earned = total_earned + $2,
                ads_watched = ads_watched + $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(credit.account_id)
        .bind(credit.amount)
        .bind(ads_increment)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound(credit.account_id))?;

        sqlx::query(
            r#"
            INSERT INTO transactions (account_id, amount, kind, description)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(credit.account_id)
        .bind(credit.amount)
        .bind(credit.source.kind())
        .bind(&credit.description)
        .execute(&mut *tx)
        .await?;

        match &credit.source {
            CreditSource::AdView {
                block_id,
                impression_id,
            } => {
                let recorded: Option<i64> = sqlx::query_scalar(
                    r#"
                    INSERT INTO ad_views (account_id, amount, block_id, impression_id)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (account_id, impression_id) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(credit.account_id)
                .bind(credit.amount)
                .bind(block_id)
                .bind(impression_id)
                .fetch_optional(&mut *tx)
                .await?;

                if recorded.is_none() {
                    tx.rollback().await?;
                    return Err(LedgerError::Conflict(format!(
                        "ad impression {} was already rewarded",
                        impression_id.as_deref().unwrap_or_default()
                    )));
                }
            }
            CreditSource::ReferralBonus { referred_id } => {
                sqlx::query(
                    r#"
                    UPDATE referrals
                    SET bonus_earned = bonus_earned + $3
                    WHERE referrer_id = $1 AND referred_id = $2
                    "#,
                )
                .bind(credit.account_id)
                .bind(referred_id)
                .bind(credit.amount)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(account)
    }

    async fn debit(&self, id: AccountId, amount: Decimal) -> Result<Account, LedgerError> {
        ensure_amount(amount)?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND balance >= $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.conn)
        .await?;

        match account {
            Some(account) => Ok(account),
            None => {
                let current = self.fetch(id).await?;
                Err(LedgerError::InsufficientBalance {
                    balance: current.balance,
                    requested: amount,
                })
            }
        }
    }

    async fn transactions(
        &self,
        id: AccountId,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.ensure_exists(id).await?;

        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, account_id, amount, kind, description, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(transactions)
    }

    async fn referrals(&self, id: AccountId, limit: i64) -> Result<Vec<Referral>, LedgerError> {
        self.ensure_exists(id).await?;

        let referrals = sqlx::query_as::<_, Referral>(
            r#"
            SELECT r.referred_id, a.handle, a.display_name, r.bonus_earned, r.created_at AS joined_at
            FROM referrals r
            JOIN accounts a ON a.id = r.referred_id
            WHERE r.referrer_id = $1
            ORDER BY r.created_at DESC, r.referred_id DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(referrals)
    }

    async fn open_withdrawal(
        &self,
        request: NewWithdrawal,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        ensure_amount(request.amount)?;

        let mut tx = self.conn.begin().await?;

        let current = lock_account(&mut tx, request.account_id).await?;
        if current.balance < request.amount {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientBalance {
                balance: current.balance,
                requested: request.amount,
            });
        }

        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(request.account_id)
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await?;

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawal_requests (account_id, amount, destination, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(request.account_id)
        .bind(request.amount)
        .bind(&request.destination)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(WithdrawalReceipt {
            account,
            withdrawal,
        })
    }

    async fn settle_withdrawal(
        &self,
        id: WithdrawalId,
        outcome: SettlementOutcome,
    ) -> Result<Settlement, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let current =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawal_requests WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LedgerError::WithdrawalNotFound(id))?;

        if current.status.is_terminal() {
            tx.rollback().await?;
            return Err(LedgerError::Conflict(format!(
                "withdrawal {} is already {:?}",
                id, current.status
            )));
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            UPDATE withdrawal_requests
            SET status = $2, failure_reason = $3, processed_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome.status())
        .bind(outcome.reason())
        .fetch_one(&mut *tx)
        .await?;

        let account = if withdrawal.status == WithdrawalStatus::Failed {
            let account = sqlx::query_as::<_, Account>(
                r#"
                UPDATE accounts
                SET balance = balance + $2, updated_at = CURRENT_TIMESTAMP
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(withdrawal.account_id)
            .bind(withdrawal.amount)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO balance_adjustments (account_id, withdrawal_id, amount, reason)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(withdrawal.account_id)
            .bind(withdrawal.id)
            .bind(withdrawal.amount)
            .bind(AdjustmentReason::WithdrawalRefund)
            .execute(&mut *tx)
            .await?;

            account
        } else {
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
                .bind(withdrawal.account_id)
                .fetch_one(&mut *tx)
                .await?
        };

        tx.commit().await?;

        Ok(Settlement {
            withdrawal,
            account,
        })
    }

    async fn withdrawals(
        &self,
        id: AccountId,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, LedgerError> {
        self.ensure_exists(id).await?;

        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT *
            FROM withdrawal_requests
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(withdrawals)
    }
}

// Run with `DATABASE_URL` pointing at a scratch server: `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use futures_util::future::join_all;

    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn new_account(id: AccountId, referrer_id: Option<AccountId>) -> NewAccount {
        NewAccount {
            id,
            display_name: format!("user {}", id),
            handle: None,
            referrer_id,
        }
    }

    fn ad_credit(id: AccountId, amount: &str, impression_id: Option<&str>) -> Credit {
        Credit {
            account_id: id,
            amount: dec(amount),
            source: CreditSource::AdView {
                block_id: "20933".to_string(),
                impression_id: impression_id.map(str::to_string),
            },
            description: "Ad view reward".to_string(),
        }
    }

    async fn adjustments(pool: &PgPool, withdrawal_id: WithdrawalId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM balance_adjustments WHERE withdrawal_id = $1")
            .bind(withdrawal_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn referral_link_is_set_once(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        ledger.create_or_fetch(new_account(1, None)).await.unwrap();
        ledger.create_or_fetch(new_account(2, None)).await.unwrap();

        let first = ledger.create_or_fetch(new_account(3, Some(1))).await.unwrap();
        let again = ledger.create_or_fetch(new_account(3, Some(2))).await.unwrap();
        let selfish = ledger.create_or_fetch(new_account(4, Some(4))).await.unwrap();

        assert_eq!(first.referrer_id, Some(1));
        assert_eq!(again.referrer_id, Some(1));
        assert_eq!(selfish.referrer_id, None);
        assert_eq!(ledger.fetch(1).await.unwrap().referrals_count, 1);
        assert_eq!(ledger.fetch(2).await.unwrap().referrals_count, 0);
        assert_eq!(ledger.referrals(1, 50).await.unwrap()[0].referred_id, 3);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_credits_are_not_lost(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        ledger.create_or_fetch(new_account(1, None)).await.unwrap();

        let credits = (0..20).map(|_| ledger.credit(ad_credit(1, "0.000281", None)));
        for result in join_all(credits).await {
            result.unwrap();
        }

        let account = ledger.fetch(1).await.unwrap();
        assert_eq!(account.balance, dec("0.00562"));
        assert_eq!(account.total_earned, dec("0.00562"));
        assert_eq!(account.ads_watched, 20);
        assert_eq!(ledger.transactions(1, 50).await.unwrap().len(), 20);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn repeated_impression_rolls_back(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        ledger.create_or_fetch(new_account(1, None)).await.unwrap();

        ledger.credit(ad_credit(1, "0.000281", Some("imp-1"))).await.unwrap();
        let replay = ledger.credit(ad_credit(1, "0.000281", Some("imp-1"))).await;

        assert!(matches!(replay, Err(LedgerError::Conflict(_))));
        let account = ledger.fetch(1).await.unwrap();
        assert_eq!(account.balance, dec("0.000281"));
        assert_eq!(account.ads_watched, 1);
        assert_eq!(ledger.transactions(1, 50).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn withdrawal_debits_exactly_and_refunds_once(pool: PgPool) {
        let ledger = PgLedger::new(pool.clone());
        ledger.create_or_fetch(new_account(1, None)).await.unwrap();
        ledger.credit(ad_credit(1, "1", None)).await.unwrap();

        let overdraft = ledger
            .open_withdrawal(NewWithdrawal {
                account_id: 1,
                destination: "UQdest".to_string(),
                amount: dec("1.000000001"),
            })
            .await;
        assert!(matches!(
            overdraft,
            Err(LedgerError::InsufficientBalance { .. })
        ));

        let receipt = ledger
            .open_withdrawal(NewWithdrawal {
                account_id: 1,
                destination: "UQdest".to_string(),
                amount: dec("0.6"),
            })
            .await
            .unwrap();
        assert_eq!(receipt.account.balance, dec("0.4"));
        assert_eq!(receipt.withdrawal.status, WithdrawalStatus::Pending);

        ledger.credit(ad_credit(1, "0.000281", None)).await.unwrap();
        let settlement = ledger
            .settle_withdrawal(receipt.withdrawal.id, SettlementOutcome::Failed { reason: None })
            .await
            .unwrap();
        let again = ledger
            .settle_withdrawal(receipt.withdrawal.id, SettlementOutcome::Failed { reason: None })
            .await;

        assert_eq!(settlement.account.balance, dec("1.000281"));
        assert!(settlement.withdrawal.processed_at.is_some());
        assert!(matches!(again, Err(LedgerError::Conflict(_))));
        assert_eq!(ledger.fetch(1).await.unwrap().balance, dec("1.000281"));
        assert_eq!(adjustments(&pool, receipt.withdrawal.id).await, 1);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn unknown_rows_are_not_found(pool: PgPool) {
        let ledger = PgLedger::new(pool);

        let fetch = ledger.fetch(9).await;
        let credit = ledger.credit(ad_credit(9, "0.000281", None)).await;
        let settle = ledger
            .settle_withdrawal(42, SettlementOutcome::Completed)
            .await;
        let history = ledger.withdrawals(9, 50).await;

        assert!(matches!(fetch, Err(LedgerError::NotFound(9))));
        assert!(matches!(credit, Err(LedgerError::NotFound(9))));
        assert!(matches!(settle, Err(LedgerError::WithdrawalNotFound(42))));
        assert!(matches!(history, Err(LedgerError::NotFound(9))));
    }
}
