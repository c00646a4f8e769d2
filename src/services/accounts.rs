use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Reply, RequestHandler, Service, ServiceError};
use crate::models::{
    accounts::{Account, AccountId, NewAccount},
    referrals::Referral,
    transactions::{Credit, CreditSource, Transaction},
};
use crate::repositories::{Ledger, LedgerError};

pub enum AccountRequest {
    CreateOrFetch {
        account: NewAccount,
        response: Reply<Account>,
    },
    Fetch {
        id: AccountId,
        response: Reply<Account>,
    },
    Credit {
        credit: Credit,
        response: Reply<Account>,
    },
    Debit {
        id: AccountId,
        amount: Decimal,
        response: Reply<Account>,
    },
    CreditReferrerBonus {
        referrer_id: AccountId,
        referred_id: AccountId,
        base_amount: Decimal,
        bonus_rate: Decimal,
        response: Reply<Account>,
    },
    ListTransactions {
        id: AccountId,
        response: Reply<Vec<Transaction>>,
    },
    ListReferrals {
        id: AccountId,
        response: Reply<Vec<Referral>>,
    },
}

#[derive(Clone)]
pub struct AccountRequestHandler {
    ledger: Arc<dyn Ledger>,
    history_limit: i64,
}

impl AccountRequestHandler {
    pub fn new(ledger: Arc<dyn Ledger>, history_limit: i64) -> Self {
        AccountRequestHandler {
            ledger,
            history_limit,
        }
    }

    async fn create_or_fetch(&self, account: NewAccount) -> Result<Account, ServiceError> {
        let id = account.id;
        let account = self.ledger.create_or_fetch(account).await?;
        log::debug!("Account {} ready, referrer {:?}.", id, account.referrer_id);

        Ok(account)
    }

    async fn fetch(&self, id: AccountId) -> Result<Account, ServiceError> {
        Ok(self.ledger.fetch(id).await?)
    }

    async fn credit(&self, credit: Credit) -> Result<Account, ServiceError> {
        let (id, amount, kind) = (credit.account_id, credit.amount, credit.source.kind());
        let account = self.ledger.credit(credit).await?;
        log::info!("Credited {} to account {} ({:?}).", amount, id, kind);

        Ok(account)
    }

    async fn debit(&self, id: AccountId, amount: Decimal) -> Result<Account, ServiceError> {
        let account = self.ledger.debit(id, amount).await?;
        log::info!("Debited {} from account {}.", amount, id);

        Ok(account)
    }

    async fn credit_referrer_bonus(
        &self,
        referrer_id: AccountId,
        referred_id: AccountId,
        base_amount: Decimal,
        bonus_rate: Decimal,
    ) -> Result<Account, ServiceError> {
        let bonus = base_amount * bonus_rate;

        let credit = Credit {
            account_id: referrer_id,
            amount: bonus,
            source: CreditSource::ReferralBonus { referred_id },
            description: format!("Referral bonus from {}", referred_id),
        };

        match self.ledger.credit(credit).await {
            Ok(account) => {
                log::info!(
                    "Credited referral bonus {} to account {} for {}.",
                    bonus,
                    referrer_id,
                    referred_id
                );
                Ok(account)
            }
            Err(LedgerError::NotFound(id)) => Err(ServiceError::ReferrerMissing(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.ledger.transactions(id, self.history_limit).await?)
    }

    async fn list_referrals(&self, id: AccountId) -> Result<Vec<Referral>, ServiceError> {
        Ok(self.ledger.referrals(id, self.history_limit).await?)
    }
}

#[async_trait]
impl RequestHandler<AccountRequest> for AccountRequestHandler {
    async fn handle_request(&self, request: AccountRequest) {
        match request {
            AccountRequest::CreateOrFetch { account, response } => {
                let account = self.create_or_fetch(account).await;
                let _ = response.send(account);
            }
            AccountRequest::Fetch { id, response } => {
                let account = self.fetch(id).await;
                let _ = response.send(account);
            }
            AccountRequest::Credit { credit, response } => {
                let account = self.credit(credit).await;
                let _ = response.send(account);
            }
            AccountRequest::Debit {
                id,
                amount,
                response,
            } => {
                let account = self.debit(id, amount).await;
                let _ = response.send(account);
            }
            AccountRequest::CreditReferrerBonus {
                referrer_id,
                referred_id,
                base_amount,
                bonus_rate,
                response,
            } => {
                let account = self
                    .credit_referrer_bonus(referrer_id, referred_id, base_amount, bonus_rate)
                    .await;
                let _ = response.send(account);
            }
            AccountRequest::ListTransactions { id, response } => {
                let transactions = self.list_transactions(id).await;
                let _ = response.send(transactions);
            }
            AccountRequest::ListReferrals { id, response } => {
                let referrals = self.list_referrals(id).await;
                let _ = response.send(referrals);
            }
        }
    }
}

pub struct AccountService;

impl AccountService {
    pub fn new() -> Self {
        AccountService {}
    }
}

#[async_trait]
impl Service<AccountRequest, AccountRequestHandler> for AccountService {}
