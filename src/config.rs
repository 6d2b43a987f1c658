use crate::domain::money::Currency;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, read from an optional JSON file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub credit: CreditConfig,
    /// Key rate served by the static rate source. `None` means the source is unavailable.
    #[serde(default)]
    pub key_rate: Option<Decimal>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| LedgerError::ConfigError(format!("{}: {e}", path.display())))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_penalty_rate")]
    pub penalty_rate: Decimal,
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            penalty_rate: default_penalty_rate(),
            grace_days: default_grace_days(),
        }
    }
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_penalty_rate() -> Decimal {
    dec!(0.10)
}

fn default_grace_days() -> i64 {
    1
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreditConfig {
    #[serde(default = "default_fallback_key_rate")]
    pub fallback_key_rate: Decimal,
    #[serde(default = "default_rate_markup")]
    pub rate_markup: Decimal,
    #[serde(default = "default_min_term_months")]
    pub min_term_months: u32,
    #[serde(default = "default_max_term_months")]
    pub max_term_months: u32,
    #[serde(default)]
    pub currency: Currency,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            fallback_key_rate: default_fallback_key_rate(),
            rate_markup: default_rate_markup(),
            min_term_months: default_min_term_months(),
            max_term_months: default_max_term_months(),
            currency: Currency::default(),
        }
    }
}

fn default_fallback_key_rate() -> Decimal {
    dec!(7.0)
}

fn default_rate_markup() -> Decimal {
    dec!(5.0)
}

fn default_min_term_months() -> u32 {
    1
}

fn default_max_term_months() -> u32 {
    360
}
