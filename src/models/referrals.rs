use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accounts::AccountId;

const REFERRAL_TOKEN_PREFIX: &str = "ref_";

/// An account referred by someone, seen from the referrer's side.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Referral {
    pub referred_id: AccountId,
    pub handle: Option<String>,
    pub display_name: String,
    #[serde(serialize_with = "super::normalized")]
    pub bonus_earned: Decimal,
    pub joined_at: DateTime<Utc>,
}

/// Extracts the referrer id out of a `ref_<id>` start parameter.
pub fn parse_referral_token(token: &str) -> Option<AccountId> {
    token
        .trim()
        .strip_prefix(REFERRAL_TOKEN_PREFIX)
        .and_then(|id| id.parse::<AccountId>().ok())
        .filter(|id| *id > 0)
}
