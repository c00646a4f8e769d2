use std::fmt;

use serde::{Deserialize, Serialize};

use super::accounts::AccountId;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdFailure {
    NoInventory,
    Abandoned,
    SdkUnavailable,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for AdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdFailure::NoInventory => write!(f, "no ad available right now"),
            AdFailure::Abandoned => write!(f, "ad closed before the end"),
            AdFailure::SdkUnavailable => write!(f, "ad player unavailable"),
            AdFailure::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Playback result reported by the ad player on the client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdOutcome {
    Completed,
    Failed { reason: AdFailure },
}

/// Body of `/ad/reward`. The reward amount is never taken from the client.
#[derive(Clone, Debug, Deserialize)]
pub struct AdRewardClaim {
    pub telegram_id: AccountId,
    pub block_id: Option<String>,
    pub impression_id: Option<String>,
    pub outcome: AdOutcome,
}
