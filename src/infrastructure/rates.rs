use crate::domain::ports::RateSource;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Serves a key rate fixed at startup. With no rate configured every lookup
/// fails, which makes callers fall back to their configured default.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRateSource {
    rate: Option<Decimal>,
}

impl StaticRateSource {
    pub fn new(rate: Option<Decimal>) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    async fn key_rate(&self) -> Result<Decimal> {
        self.rate
            .ok_or_else(|| LedgerError::internal("no key rate configured"))
    }
}
