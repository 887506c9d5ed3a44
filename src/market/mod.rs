//! Market data capability consumed by the trading environment.
//!
//! Vendor integrations live behind [`MarketDataSource`]; the crate ships the
//! synthetic mock provider and the registry seam real providers plug into.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, TradegymError};

pub use mock::MockMarketData;

/// One market sample for a ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    /// Last traded price (equals `close`)
    pub price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

/// Source of market samples
///
/// A failure for one ticker must never abort an episode; the environment
/// falls back to the last known price.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn latest_quote(&self, ticker: &str) -> Result<Quote>;

    async fn validate_ticker(&self, ticker: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Mock,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Mock
    }
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mock" | "synthetic" => Ok(Self::Mock),
            _ => Err("invalid data provider; expected mock"),
        }
    }
}

pub fn parse_provider_kind(raw: &str) -> Result<ProviderKind> {
    ProviderKind::from_str(raw).map_err(|e| TradegymError::Validation(e.to_string()))
}

/// Construct a market data source for the given provider kind
pub fn build_market_source(kind: ProviderKind, seed: Option<u64>) -> Arc<dyn MarketDataSource> {
    match kind {
        ProviderKind::Mock => match seed {
            Some(seed) => Arc::new(MockMarketData::with_seed(seed)),
            None => Arc::new(MockMarketData::new()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provider_kind_accepts_aliases() {
        assert_eq!(
            parse_provider_kind("mock").expect("mock should parse"),
            ProviderKind::Mock
        );
        assert_eq!(
            parse_provider_kind("Synthetic").expect("synthetic alias should parse"),
            ProviderKind::Mock
        );
    }

    #[test]
    fn parse_provider_kind_rejects_unknown_value() {
        assert!(parse_provider_kind("yahoo").is_err());
    }
}
