use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use super::accounts::AccountRequest;
use super::{call, Reply, RequestHandler, Service, ServiceError};
use crate::models::{
    accounts::{Account, AccountId},
    ads::{AdOutcome, AdRewardClaim},
    transactions::{Credit, CreditSource},
};

pub enum RewardRequest {
    IssueAdReward {
        claim: AdRewardClaim,
        response: Reply<Account>,
    },
}

/// Turns completed ad views into credits. The amount and the referral share
/// come from configuration only.
#[derive(Clone)]
pub struct RewardRequestHandler {
    account_channel: mpsc::Sender<AccountRequest>,
    reward_amount: Decimal,
    referral_rate: Decimal,
    default_block_id: String,
}

impl RewardRequestHandler {
    pub fn new(
        account_channel: mpsc::Sender<AccountRequest>,
        reward_amount: Decimal,
        referral_rate: Decimal,
        default_block_id: String,
    ) -> Self {
        RewardRequestHandler {
            account_channel,
            reward_amount,
            referral_rate,
            default_block_id,
        }
    }

    async fn issue_ad_reward(&self, claim: AdRewardClaim) -> Result<Account, ServiceError> {
        // The completion signal comes from the client; there is no ad network
        // callback to check it against yet.
        if let AdOutcome::Failed { reason } = &claim.outcome {
            log::info!(
                "No reward for account {}: ad not completed ({}).",
                claim.telegram_id,
                reason
            );
            return Err(ServiceError::AdNotCompleted(reason.to_string()));
        }

        let block_id = claim
            .block_id
            .filter(|block_id| !block_id.trim().is_empty())
            .unwrap_or_else(|| self.default_block_id.clone());
        let impression_id = claim
            .impression_id
            .filter(|impression_id| !impression_id.trim().is_empty());

        let credit = Credit {
            account_id: claim.telegram_id,
            amount: self.reward_amount,
            source: CreditSource::AdView {
                block_id,
                impression_id,
            },
            description: "Ad view reward".to_string(),
        };
        let account = call(&self.account_channel, "Rewards => Accounts", |response| {
            AccountRequest::Credit { credit, response }
        })
        .await?;

        if let Some(referrer_id) = account.referrer_id {
            self.pay_referrer(referrer_id, account.id).await;
        }

        Ok(account)
    }

    /// Never fails the reward it follows: problems are only logged.
    async fn pay_referrer(&self, referrer_id: AccountId, referred_id: AccountId) {
        if self.referral_rate.is_zero() {
            return;
        }

        let result = call(&self.account_channel, "Rewards => Accounts", |response| {
            AccountRequest::CreditReferrerBonus {
                referrer_id,
                referred_id,
                base_amount: self.reward_amount,
                bonus_rate: self.referral_rate,
                response,
            }
        })
        .await;

        match result {
            Ok(_) => (),
            Err(ServiceError::ReferrerMissing(id)) => {
                log::warn!("Referrer {} of account {} is gone, bonus skipped.", id, referred_id);
            }
            Err(e) => {
                log::error!(
                    "Failed to credit referral bonus to {} for {}: {}",
                    referrer_id,
                    referred_id,
                    e
                );
            }
        }
    }
}

#[async_trait]
impl RequestHandler<RewardRequest> for RewardRequestHandler {
    async fn handle_request(&self, request: RewardRequest) {
        match request {
            RewardRequest::IssueAdReward { claim, response } => {
                let account = self.issue_ad_reward(claim).await;
                let _ = response.send(account);
            }
        }
    }
}

pub struct RewardService;

impl RewardService {
    pub fn new() -> Self {
        RewardService {}
    }
}

#[async_trait]
impl Service<RewardRequest, RewardRequestHandler> for RewardService {}
