use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    accounts::AccountRequest, rewards::RewardRequest, withdrawals::WithdrawalServiceRequest,
    Channels, ServiceError,
};

mod accounts;
mod rewards;
mod withdrawals;

#[derive(Clone)]
pub struct AppState {
    account_channel: mpsc::Sender<AccountRequest>,
    reward_channel: mpsc::Sender<RewardRequest>,
    withdrawal_channel: mpsc::Sender<WithdrawalServiceRequest>,
    settlement_key: String,
}

impl AppState {
    pub fn new(channels: Channels, settlement_key: String) -> Self {
        AppState {
            account_channel: channels.accounts,
            reward_channel: channels.rewards,
            withdrawal_channel: channels.withdrawals,
            settlement_key,
        }
    }
}

type JsonResponse = (StatusCode, Json<Value>);

fn error_response(error: ServiceError) -> JsonResponse {
    let (status, code) = match &error {
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::WithdrawalNotFound(_) => (StatusCode::NOT_FOUND, "withdrawal_not_found"),
        ServiceError::InsufficientBalance { .. } => {
            (StatusCode::BAD_REQUEST, "insufficient_balance")
        }
        ServiceError::BelowMinimum { .. } => (StatusCode::BAD_REQUEST, "below_minimum"),
        ServiceError::InvalidDestination => (StatusCode::BAD_REQUEST, "invalid_destination"),
        ServiceError::InvalidAmount(_) | ServiceError::TooPrecise { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_amount")
        }
        ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        ServiceError::AdNotCompleted(_) => (StatusCode::BAD_REQUEST, "ad_not_completed"),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        ServiceError::ReferrerMissing(_)
        | ServiceError::Database(_)
        | ServiceError::Communication(_, _) => {
            log::error!("Request failed: {}", error);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Something went wrong, please try again later.",
                    "code": "internal"
                })),
            );
        }
    };

    (
        status,
        Json(json!({
            "error": error.to_string(),
            "code": code
        })),
    )
}

/// Turns an extractor rejection into the same JSON error shape as everything else.
fn rejected(rejection: impl std::fmt::Display) -> JsonResponse {
    error_response(ServiceError::InvalidRequest(rejection.to_string()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/user/init", post(accounts::init_account))
        .route("/user/{id}", get(accounts::get_account))
        .route("/transactions/{id}", get(accounts::list_transactions))
        .route("/referrals/{id}", get(accounts::list_referrals))
        .route("/ad/reward", post(rewards::issue_ad_reward))
        .route("/withdraw/request", post(withdrawals::request_withdrawal))
        .route("/withdraw/history/{id}", get(withdrawals::history))
        .route("/withdraw/{id}/settle", post(withdrawals::settle))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(listen: &str, state: AppState) -> Result<(), anyhow::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rust_decimal::Decimal;
    use tower::ServiceExt;

    use super::*;
    use crate::models::transactions::{Credit, CreditSource};
    use crate::repositories::Ledger;
    use crate::services::testing;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };

        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn app() -> Router {
        let (_, channels) = testing::services();
        router(AppState::new(channels, testing::SETTLEMENT_KEY.to_string()))
    }

    async fn register(app: &Router, id: i64, start_param: Option<&str>) -> Value {
        let (status, body) = send(
            app,
            post_json(
                "/user/init",
                json!({
                    "telegram_id": id,
                    "username": format!("user{}", id),
                    "first_name": "Test",
                    "start_param": start_param
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        body
    }

    async fn watch_ad(app: &Router, id: i64) -> (StatusCode, Value) {
        send(
            app,
            post_json(
                "/ad/reward",
                json!({
                    "telegram_id": id,
                    "block_id": "20933",
                    "outcome": {"status": "completed"}
                }),
            ),
        )
        .await
    }

    #[tokio::test]
    async fn health_check() {
        let response = app().oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_user_is_404() {
        let (status, body) = send(&app(), get("/user/77")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn malformed_requests_get_json_errors() {
        let app = app();

        let (status, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"wallet_address": "UQdest", "amount": "0.5"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
        assert!(body["error"].as_str().unwrap().contains("telegram_id"));

        let (status, body) = send(&app, get("/user/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");

        let request = Request::post("/ad/reward")
            .body(Body::from(r#"{"telegram_id": 1}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn over_precise_withdrawal_is_rejected() {
        let (ledger, channels) = testing::services();
        let app = router(AppState::new(channels, testing::SETTLEMENT_KEY.to_string()));
        register(&app, 1, None).await;
        ledger
            .credit(Credit {
                account_id: 1,
                amount: Decimal::ONE,
                source: CreditSource::AdView {
                    block_id: "20933".to_string(),
                    impression_id: None,
                },
                description: "Ad view reward".to_string(),
            })
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"telegram_id": 1, "wallet_address": "UQdest", "amount": "0.9999999999"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_amount");
        assert_eq!(body["error"], "Amounts can have at most 9 decimal places.");
        let (_, body) = send(&app, get("/user/1")).await;
        assert_eq!(body["balance"], "1");
    }

    #[tokio::test]
    async fn referral_flow_over_http() {
        let app = app();
        register(&app, 2, None).await;
        let referred = register(&app, 1, Some("ref_2")).await;
        assert_eq!(referred["referrer_id"], 2);

        let (status, body) = watch_ad(&app, 1).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], "0.000281");
        assert_eq!(body["ads_watched"], 1);

        let (_, referrer) = send(&app, get("/user/2")).await;
        assert_eq!(referrer["balance"], "0.0000281");
        assert_eq!(referrer["referrals_count"], 1);

        let (status, body) = send(&app, get("/referrals/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["referrals"][0]["referred_id"], 1);
        assert_eq!(body["referrals"][0]["bonus_earned"], "0.0000281");

        let (_, body) = send(&app, get("/transactions/2")).await;
        assert_eq!(body["transactions"][0]["kind"], "referral_bonus");
    }

    #[tokio::test]
    async fn reward_amount_is_not_taken_from_client() {
        let app = app();
        register(&app, 1, None).await;

        let (status, body) = send(
            &app,
            post_json(
                "/ad/reward",
                json!({
                    "telegram_id": 1,
                    "reward_amount": "1000",
                    "outcome": {"status": "completed"}
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], "0.000281");
    }

    #[tokio::test]
    async fn abandoned_ad_is_a_bad_request() {
        let app = app();
        register(&app, 1, None).await;

        let (status, body) = send(
            &app,
            post_json(
                "/ad/reward",
                json!({
                    "telegram_id": 1,
                    "outcome": {"status": "failed", "reason": "abandoned"}
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ad_not_completed");
    }

    #[tokio::test]
    async fn withdrawal_errors_are_actionable() {
        let app = app();
        register(&app, 1, None).await;
        watch_ad(&app, 1).await;

        let (status, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"telegram_id": 1, "wallet_address": "", "amount": "0.5"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Connect a wallet first.");

        let (_, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"telegram_id": 1, "wallet_address": "UQdest", "amount": "0.1"}),
            ),
        )
        .await;
        assert_eq!(body["error"], "Minimum withdrawal is 0.5.");

        let (_, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"telegram_id": 1, "wallet_address": "UQdest", "amount": "0.5"}),
            ),
        )
        .await;
        assert_eq!(body["code"], "insufficient_balance");
    }

    #[tokio::test]
    async fn settlement_requires_the_key() {
        let (ledger, channels) = testing::services();
        let app = router(AppState::new(channels, testing::SETTLEMENT_KEY.to_string()));
        register(&app, 1, None).await;
        ledger
            .credit(Credit {
                account_id: 1,
                amount: Decimal::ONE,
                source: CreditSource::AdView {
                    block_id: "20933".to_string(),
                    impression_id: None,
                },
                description: "Ad view reward".to_string(),
            })
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            post_json(
                "/withdraw/request",
                json!({"telegram_id": 1, "wallet_address": "UQdest", "amount": 0.6}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_balance"], "0.4");
        let withdrawal_id = body["withdrawal_id"].as_i64().unwrap();

        let uri = format!("/withdraw/{}/settle", withdrawal_id);
        let (status, _) = send(&app, post_json(&uri, json!({"outcome": "failed"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::post(uri.as_str())
            .header("content-type", "application/json")
            .header("x-settlement-key", testing::SETTLEMENT_KEY)
            .body(Body::from(json!({"outcome": "failed", "reason": "bounced"}).to_string()))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["withdrawal"]["status"], "failed");

        let (_, body) = send(&app, get("/withdraw/history/1")).await;
        assert_eq!(body["withdrawals"][0]["status"], "failed");
        let (_, body) = send(&app, get("/user/1")).await;
        assert_eq!(body["balance"], "1");
    }
}
