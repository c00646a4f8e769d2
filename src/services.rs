use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use crate::models::{accounts::AccountId, withdrawals::WithdrawalId};
use crate::repositories::{Ledger, LedgerError, AMOUNT_SCALE};
use crate::settings::Settings;

pub mod accounts;
pub mod http;
pub mod rewards;
pub mod withdrawals;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Account {0} not found, open the app to register.")]
    NotFound(AccountId),
    #[error("Withdrawal {0} not found.")]
    WithdrawalNotFound(WithdrawalId),
    #[error("Insufficient balance: {balance} available, {requested} requested.")]
    InsufficientBalance { balance: Decimal, requested: Decimal },
    #[error("Minimum withdrawal is {minimum}.")]
    BelowMinimum { minimum: Decimal },
    #[error("Connect a wallet first.")]
    InvalidDestination,
    #[error("Amount must be positive, got {0}.")]
    InvalidAmount(Decimal),
    #[error("Amounts can have at most {places} decimal places.")]
    TooPrecise { places: u32 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Ad was not watched to the end: {0}.")]
    AdNotCompleted(String),
    #[error("Referrer {0} not found.")]
    ReferrerMissing(AccountId),
    #[error("Conflict: {0}.")]
    Conflict(String),
    #[error("Settlement key rejected.")]
    Unauthorized,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => ServiceError::NotFound(id),
            LedgerError::WithdrawalNotFound(id) => ServiceError::WithdrawalNotFound(id),
            LedgerError::InsufficientBalance { balance, requested } => {
                ServiceError::InsufficientBalance {
                    balance: balance.normalize(),
                    requested: requested.normalize(),
                }
            }
            LedgerError::NonPositiveAmount(amount) => ServiceError::InvalidAmount(amount),
            LedgerError::TooPrecise(_) => ServiceError::TooPrecise {
                places: AMOUNT_SCALE,
            },
            LedgerError::Conflict(reason) => ServiceError::Conflict(reason),
            LedgerError::Database(e) => ServiceError::Database(e.to_string()),
        }
    }
}

pub type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Sends a request built around a fresh reply channel and waits for the answer.
pub async fn call<R, T, F>(
    channel: &mpsc::Sender<R>,
    service: &str,
    build: F,
) -> Result<T, ServiceError>
where
    F: FnOnce(Reply<T>) -> R,
{
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders into each running service.
#[derive(Clone)]
pub struct Channels {
    pub accounts: mpsc::Sender<accounts::AccountRequest>,
    pub rewards: mpsc::Sender<rewards::RewardRequest>,
    pub withdrawals: mpsc::Sender<withdrawals::WithdrawalServiceRequest>,
}

pub fn spawn_services(ledger: Arc<dyn Ledger>, settings: &Settings) -> Channels {
    let (account_tx, mut account_rx) = mpsc::channel(512);
    let (reward_tx, mut reward_rx) = mpsc::channel(512);
    let (withdrawal_tx, mut withdrawal_rx) = mpsc::channel(512);

    let mut account_service = accounts::AccountService::new();
    let mut reward_service = rewards::RewardService::new();
    let mut withdrawal_service = withdrawals::WithdrawalService::new();

    log::info!("Starting account service.");
    let account_handler =
        accounts::AccountRequestHandler::new(ledger.clone(), settings.ledger.history_limit);
    tokio::spawn(async move {
        account_service
            .run(account_handler, &mut account_rx)
            .await;
    });

    log::info!("Starting reward service.");
    let reward_handler = rewards::RewardRequestHandler::new(
        account_tx.clone(),
        settings.rewards.amount,
        settings.rewards.referral_rate,
        settings.rewards.default_block_id.clone(),
    );
    tokio::spawn(async move {
        reward_service.run(reward_handler, &mut reward_rx).await;
    });

    log::info!("Starting withdrawal service.");
    let withdrawal_handler = withdrawals::WithdrawalRequestHandler::new(
        ledger,
        settings.withdrawals.min_amount,
        settings.ledger.history_limit,
    );
    tokio::spawn(async move {
        withdrawal_service
            .run(withdrawal_handler, &mut withdrawal_rx)
            .await;
    });

    Channels {
        accounts: account_tx,
        rewards: reward_tx,
        withdrawals: withdrawal_tx,
    }
}

pub async fn start_services(ledger: Arc<dyn Ledger>, settings: Settings) -> Result<(), anyhow::Error> {
    let channels = spawn_services(ledger, &settings);

    log::info!("Starting HTTP server.");
    http::start_http_server(
        &settings.http.listen,
        http::AppState::new(channels, settings.settlement.api_key.clone()),
    )
    .await
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use super::{spawn_services, Channels};
    use crate::repositories::memory::MemoryLedger;
    use crate::settings::Settings;

    pub const SETTLEMENT_KEY: &str = "test-settlement-key";

    pub fn settings() -> Settings {
        Settings::from_toml(&format!(
            r#"
            [storage]
            kind = "memory"

            [settlement]
            api_key = "{}"
            "#,
            SETTLEMENT_KEY
        ))
        .expect("test settings")
    }

    pub fn services() -> (Arc<MemoryLedger>, Channels) {
        let ledger = Arc::new(MemoryLedger::new());
        let channels = spawn_services(ledger.clone(), &settings());

        (ledger, channels)
    }
}
