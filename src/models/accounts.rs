use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::referrals::parse_referral_token;

pub type AccountId = i64;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub handle: Option<String>,
    #[serde(serialize_with = "super::normalized")]
    pub balance: Decimal,
    #[serde(serialize_with = "super::normalized")]
    pub total_earned: Decimal,
    pub ads_watched: i64,
    pub referrer_id: Option<AccountId>,
    pub referrals_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub id: AccountId,
    pub display_name: String,
    pub handle: Option<String>,
    pub referrer_id: Option<AccountId>,
}

/// Body of `/user/init`, as handed over by the web app host.
#[derive(Clone, Debug, Deserialize)]
pub struct InitAccount {
    pub telegram_id: AccountId,
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub referrer_id: Option<AccountId>,
    pub start_param: Option<String>,
}

impl From<InitAccount> for NewAccount {
    fn from(init: InitAccount) -> Self {
        let display_name = match init.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", init.first_name.trim(), last),
            _ => init.first_name.trim().to_string(),
        };
        let referrer_id = init
            .referrer_id
            .or_else(|| init.start_param.as_deref().and_then(parse_referral_token));

        NewAccount {
            id: init.telegram_id,
            display_name,
            handle: init.username.filter(|u| !u.trim().is_empty()),
            referrer_id,
        }
    }
}
