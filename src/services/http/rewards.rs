use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use super::{error_response, rejected, AppState, JsonResponse};
use crate::models::ads::AdRewardClaim;
use crate::services::{call, rewards::RewardRequest};

pub async fn issue_ad_reward(
    State(state): State<AppState>,
    claim: Result<Json<AdRewardClaim>, JsonRejection>,
) -> JsonResponse {
    let Json(claim) = match claim {
        Ok(claim) => claim,
        Err(rejection) => return rejected(rejection),
    };

    match call(&state.reward_channel, "HTTP => Rewards", |response| {
        RewardRequest::IssueAdReward { claim, response }
    })
    .await
    {
        Ok(account) => (StatusCode::OK, Json(json!(account))),
        Err(e) => error_response(e),
    }
}
