use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Reply, RequestHandler, Service, ServiceError};
use crate::models::{
    accounts::AccountId,
    withdrawals::{
        NewWithdrawal, Settlement, SettlementOutcome, Withdrawal, WithdrawalId,
        WithdrawalResponse, WithdrawalStatus,
    },
};
use crate::repositories::{Ledger, AMOUNT_SCALE};

pub enum WithdrawalServiceRequest {
    RequestWithdrawal {
        account_id: AccountId,
        destination: String,
        amount: Decimal,
        response: Reply<WithdrawalResponse>,
    },
    Settle {
        withdrawal_id: WithdrawalId,
        outcome: SettlementOutcome,
        response: Reply<Settlement>,
    },
    History {
        account_id: AccountId,
        response: Reply<Vec<Withdrawal>>,
    },
}

#[derive(Clone)]
pub struct WithdrawalRequestHandler {
    ledger: Arc<dyn Ledger>,
    min_amount: Decimal,
    history_limit: i64,
}

impl WithdrawalRequestHandler {
    pub fn new(ledger: Arc<dyn Ledger>, min_amount: Decimal, history_limit: i64) -> Self {
        WithdrawalRequestHandler {
            ledger,
            min_amount,
            history_limit,
        }
    }

    async fn request_withdrawal(
        &self,
        account_id: AccountId,
        destination: String,
        amount: Decimal,
    ) -> Result<WithdrawalResponse, ServiceError> {
        let destination = destination.trim().to_string();
        if destination.is_empty() {
            return Err(ServiceError::InvalidDestination);
        }
        if amount.normalize().scale() > AMOUNT_SCALE {
            return Err(ServiceError::TooPrecise {
                places: AMOUNT_SCALE,
            });
        }
        if amount < self.min_amount {
            return Err(ServiceError::BelowMinimum {
                minimum: self.min_amount.normalize(),
            });
        }

        let receipt = self
            .ledger
            .open_withdrawal(NewWithdrawal {
                account_id,
                destination,
                amount,
            })
            .await?;

        log::info!(
            "Withdrawal {} of {} opened for account {}, balance now {}.",
            receipt.withdrawal.id,
            amount,
            account_id,
            receipt.account.balance
        );

        Ok(receipt.into())
    }

    async fn settle(
        &self,
        withdrawal_id: WithdrawalId,
        outcome: SettlementOutcome,
    ) -> Result<Settlement, ServiceError> {
        let settlement = self.ledger.settle_withdrawal(withdrawal_id, outcome).await?;

        match settlement.withdrawal.status {
            WithdrawalStatus::Failed => log::warn!(
                "Withdrawal {} failed ({}), {} refunded to account {}.",
                withdrawal_id,
                settlement
                    .withdrawal
                    .failure_reason
                    .as_deref()
                    .unwrap_or("no reason given"),
                settlement.withdrawal.amount,
                settlement.account.id
            ),
            status => log::info!("Withdrawal {} settled as {:?}.", withdrawal_id, status),
        }

        Ok(settlement)
    }

    async fn history(&self, account_id: AccountId) -> Result<Vec<Withdrawal>, ServiceError> {
        Ok(self.ledger.withdrawals(account_id, self.history_limit).await?)
    }
}

#[async_trait]
impl RequestHandler<WithdrawalServiceRequest> for WithdrawalRequestHandler {
    async fn handle_request(&self, request: WithdrawalServiceRequest) {
        match request {
            WithdrawalServiceRequest::RequestWithdrawal {
                account_id,
                destination,
                amount,
                response,
            } => {
                let withdrawal = self
                    .request_withdrawal(account_id, destination, amount)
                    .await;
                let _ = response.send(withdrawal);
            }
            WithdrawalServiceRequest::Settle {
                withdrawal_id,
                outcome,
                response,
            } => {
                let settlement = self.settle(withdrawal_id, outcome).await;
                let _ = response.send(settlement);
            }
            WithdrawalServiceRequest::History {
                account_id,
                response,
            } => {
                let withdrawals = self.history(account_id).await;
                let _ = response.send(withdrawals);
            }
        }
    }
}

pub struct WithdrawalService;

impl WithdrawalService {
    pub fn new() -> Self {
        WithdrawalService {}
    }
}

#[async_trait]
impl Service<WithdrawalServiceRequest, WithdrawalRequestHandler> for WithdrawalService {}
