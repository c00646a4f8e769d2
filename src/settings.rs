use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::repositories::AMOUNT_SCALE;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub kind: StorageKind,
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub listen: String,
}

#[derive(Debug, Deserialize)]
pub struct Rewards {
    pub amount: Decimal,
    pub referral_rate: Decimal,
    pub default_block_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Withdrawals {
    pub min_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct Ledger {
    pub history_limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct Settlement {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub storage: Storage,
    pub http: Http,
    pub rewards: Rewards,
    pub withdrawals: Withdrawals,
    pub ledger: Ledger,
    pub settlement: Settlement,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("ADEARN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::validated(config.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("storage.kind", "postgres")?
            .set_default("storage.max_connections", 5)?
            .set_default("http.listen", "0.0.0.0:8080")?
            .set_default("rewards.amount", "0.000281")?
            .set_default("rewards.referral_rate", "0.10")?
            .set_default("rewards.default_block_id", "20933")?
            .set_default("withdrawals.min_amount", "0.5")?
            .set_default("ledger.history_limit", 50)?
            .set_default("settlement.api_key", "")
    }

    fn validated(settings: Settings) -> Result<Self, ConfigError> {
        if settings.rewards.amount <= Decimal::ZERO {
            return Err(ConfigError::Message(
                "rewards.amount must be positive".to_string(),
            ));
        }
        if settings.rewards.referral_rate < Decimal::ZERO
            || settings.rewards.referral_rate > Decimal::ONE
        {
            return Err(ConfigError::Message(
                "rewards.referral_rate must be between 0 and 1".to_string(),
            ));
        }
        if settings.withdrawals.min_amount <= Decimal::ZERO {
            return Err(ConfigError::Message(
                "withdrawals.min_amount must be positive".to_string(),
            ));
        }
        if settings.ledger.history_limit <= 0 {
            return Err(ConfigError::Message(
                "ledger.history_limit must be positive".to_string(),
            ));
        }
        if settings.storage.kind == StorageKind::Postgres && settings.storage.url.is_none() {
            return Err(ConfigError::Message(
                "storage.url is required when storage.kind is postgres".to_string(),
            ));
        }
        let bonus = settings.rewards.amount * settings.rewards.referral_rate;
        if settings.rewards.amount.normalize().scale() > AMOUNT_SCALE
            || bonus.normalize().scale() > AMOUNT_SCALE
        {
            return Err(ConfigError::Message(format!(
                "rewards.amount and its referral share must fit in {} decimal places",
                AMOUNT_SCALE
            )));
        }

        Ok(settings)
    }

    pub fn settlement_enabled(&self) -> bool {
        !self.settlement.api_key.is_empty()
    }

    #[cfg(test)]
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            .add_source(File::from_str(source, config::FileFormat::Toml))
            .build()?;

        Self::validated(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_in_defaults() {
        let settings = Settings::from_toml(
            r#"
            [storage]
            kind = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(settings.storage.kind, StorageKind::Memory);
        assert_eq!(settings.rewards.amount, Decimal::new(281, 6));
        assert_eq!(settings.rewards.referral_rate, Decimal::new(10, 2));
        assert_eq!(settings.rewards.default_block_id, "20933");
        assert_eq!(settings.withdrawals.min_amount, Decimal::new(5, 1));
        assert_eq!(settings.ledger.history_limit, 50);
        assert_eq!(settings.http.listen, "0.0.0.0:8080");
    }

    #[test]
    fn postgres_needs_a_url() {
        let result = Settings::from_toml("");

        assert!(result.is_err());
    }

    #[test]
    fn settlement_is_disabled_without_a_key() {
        let settings = Settings::from_toml(
            r#"
            [storage]
            kind = "memory"
            "#,
        )
        .unwrap();
        let keyed = Settings::from_toml(
            r#"
            [storage]
            kind = "memory"

            [settlement]
            api_key = "secret"
            "#,
        )
        .unwrap();

        assert!(!settings.settlement_enabled());
        assert!(keyed.settlement_enabled());
    }

    #[test]
    fn rejects_rewards_finer_than_storage() {
        let result = Settings::from_toml(
            r#"
            [storage]
            kind = "memory"

            [rewards]
            amount = "0.000000001"
            referral_rate = "0.15"
            "#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn rejects_referral_rate_above_one() {
        let result = Settings::from_toml(
            r#"
            [storage]
            kind = "memory"

            [rewards]
            referral_rate = "1.5"
            "#,
        );

        assert!(result.is_err());
    }
}
