use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::json;

use super::{error_response, rejected, AppState, JsonResponse};
use crate::models::accounts::{AccountId, InitAccount, NewAccount};
use crate::services::{accounts::AccountRequest, call};

pub async fn init_account(
    State(state): State<AppState>,
    payload: Result<Json<InitAccount>, JsonRejection>,
) -> JsonResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejected(rejection),
    };
    let account = NewAccount::from(req);

    match call(&state.account_channel, "HTTP => Accounts", |response| {
        AccountRequest::CreateOrFetch { account, response }
    })
    .await
    {
        Ok(account) => (StatusCode::OK, Json(json!(account))),
        Err(e) => error_response(e),
    }
}

pub async fn get_account(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
) -> JsonResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.account_channel, "HTTP => Accounts", |response| {
        AccountRequest::Fetch { id, response }
    })
    .await
    {
        Ok(account) => (StatusCode::OK, Json(json!(account))),
        Err(e) => error_response(e),
    }
}

pub async fn list_transactions(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
) -> JsonResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.account_channel, "HTTP => Accounts", |response| {
        AccountRequest::ListTransactions { id, response }
    })
    .await
    {
        Ok(transactions) => (
            StatusCode::OK,
            Json(json!({ "transactions": transactions })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn list_referrals(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
) -> JsonResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.account_channel, "HTTP => Accounts", |response| {
        AccountRequest::ListReferrals { id, response }
    })
    .await
    {
        Ok(referrals) => (StatusCode::OK, Json(json!({ "referrals": referrals }))),
        Err(e) => error_response(e),
    }
}
