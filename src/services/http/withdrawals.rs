use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use super::{error_response, rejected, AppState, JsonResponse};
use crate::models::{
    accounts::AccountId,
    withdrawals::{SettlementOutcome, WithdrawalClaim, WithdrawalId},
};
use crate::services::{call, withdrawals::WithdrawalServiceRequest, ServiceError};

const SETTLEMENT_KEY_HEADER: &str = "x-settlement-key";

pub async fn request_withdrawal(
    State(state): State<AppState>,
    claim: Result<Json<WithdrawalClaim>, JsonRejection>,
) -> JsonResponse {
    let Json(claim) = match claim {
        Ok(claim) => claim,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.withdrawal_channel, "HTTP => Withdrawals", |response| {
        WithdrawalServiceRequest::RequestWithdrawal {
            account_id: claim.telegram_id,
            destination: claim.wallet_address,
            amount: claim.amount,
            response,
        }
    })
    .await
    {
        Ok(withdrawal) => (StatusCode::OK, Json(json!(withdrawal))),
        Err(e) => error_response(e),
    }
}

pub async fn history(
    State(state): State<AppState>,
    account_id: Result<Path<AccountId>, PathRejection>,
) -> JsonResponse {
    let Path(account_id) = match account_id {
        Ok(account_id) => account_id,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.withdrawal_channel, "HTTP => Withdrawals", |response| {
        WithdrawalServiceRequest::History {
            account_id,
            response,
        }
    })
    .await
    {
        Ok(withdrawals) => (StatusCode::OK, Json(json!({ "withdrawals": withdrawals }))),
        Err(e) => error_response(e),
    }
}

/// Called by the settlement pipeline, never by the mini app.
pub async fn settle(
    State(state): State<AppState>,
    withdrawal_id: Result<Path<WithdrawalId>, PathRejection>,
    headers: HeaderMap,
    outcome: Result<Json<SettlementOutcome>, JsonRejection>,
) -> JsonResponse {
    let Path(withdrawal_id) = match withdrawal_id {
        Ok(withdrawal_id) => withdrawal_id,
        Err(rejection) => return rejected(rejection),
    };
    let presented = headers
        .get(SETTLEMENT_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if state.settlement_key.is_empty() || presented != Some(state.settlement_key.as_str()) {
        log::warn!("Rejected settlement of withdrawal {}.", withdrawal_id);
        return error_response(ServiceError::Unauthorized);
    }
    let Json(outcome) = match outcome {
        Ok(outcome) => outcome,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.withdrawal_channel, "HTTP => Withdrawals", |response| {
        WithdrawalServiceRequest::Settle {
            withdrawal_id,
            outcome,
            response,
        }
    })
    .await
    {
        Ok(settlement) => (StatusCode::OK, Json(json!(settlement))),
        Err(e) => error_response(e),
    }
}
