//! Synthetic market data for training and tests.
//!
//! Prices follow a small random walk with mean reversion toward a fixed
//! base table, so long training runs stay in a realistic band without any
//! network dependency. One walk step is taken per quote request.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::{Result, TradegymError};
use crate::market::{MarketDataSource, Quote};

/// Walk step size per sample
const WALK_STEP_PCT: f64 = 0.005;
/// Fraction of the gap to base price recovered per sample
const MEAN_REVERSION: f64 = 0.01;
/// Intrabar range used when synthesizing OHLC around the spot price
const RANGE_PCT: f64 = 0.02;

fn default_base_prices() -> HashMap<String, f64> {
    [
        ("AAPL", 175.0),
        ("GOOGL", 140.0),
        ("MSFT", 380.0),
        ("TSLA", 250.0),
        ("AMZN", 145.0),
        ("META", 350.0),
        ("NVDA", 480.0),
        ("JPM", 155.0),
        ("V", 250.0),
        ("WMT", 165.0),
    ]
    .into_iter()
    .map(|(ticker, price)| (ticker.to_string(), price))
    .collect()
}

struct WalkState {
    prices: HashMap<String, f64>,
    rng: StdRng,
}

/// In-process market data source backed by a seeded random walk
pub struct MockMarketData {
    base_prices: HashMap<String, f64>,
    state: Mutex<WalkState>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic source for reproducible runs and tests
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let base_prices = default_base_prices();
        let prices = base_prices.clone();
        Self {
            base_prices,
            state: Mutex::new(WalkState { prices, rng }),
        }
    }

    /// Add or override a ticker before the source is shared
    pub fn with_base_price(mut self, ticker: &str, price: f64) -> Self {
        self.base_prices.insert(ticker.to_string(), price);
        self.state
            .get_mut()
            .prices
            .insert(ticker.to_string(), price);
        self
    }

    /// Advance every ticker one walk step
    fn advance(&self, state: &mut WalkState) {
        for (ticker, price) in state.prices.iter_mut() {
            let change: f64 = state.rng.gen_range(-WALK_STEP_PCT..WALK_STEP_PCT);
            *price *= 1.0 + change;
            if let Some(base) = self.base_prices.get(ticker) {
                *price += (base - *price) * MEAN_REVERSION;
            }
        }
    }

    fn synthesize_quote(state: &mut WalkState, ticker: &str) -> Result<Quote> {
        let price = *state.prices.get(ticker).ok_or_else(|| {
            TradegymError::DataUnavailable(format!("ticker {ticker} not covered by mock market"))
        })?;

        let high = price * (1.0 + state.rng.gen_range(0.0..RANGE_PCT));
        let low = price * (1.0 - state.rng.gen_range(0.0..RANGE_PCT));
        // gen_range panics on an empty range
        let open = if low < high {
            state.rng.gen_range(low..high)
        } else {
            price
        };
        let volume: u64 = state.rng.gen_range(1_000_000..10_000_000);

        let price = to_decimal(price)?;
        Ok(Quote {
            ticker: ticker.to_string(),
            price,
            open: to_decimal(open)?,
            high: to_decimal(high)?,
            low: to_decimal(low)?,
            close: price,
            volume,
            timestamp: Utc::now(),
        })
    }
}

impl Default for MockMarketData {
    fn default() -> Self {
        Self::new()
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(4))
        .ok_or_else(|| TradegymError::Internal(format!("non-finite price {value} from mock walk")))
}

#[async_trait]
impl MarketDataSource for MockMarketData {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn latest_quote(&self, ticker: &str) -> Result<Quote> {
        let mut state = self.state.lock().await;
        self.advance(&mut state);
        Self::synthesize_quote(&mut state, ticker)
    }

    async fn validate_ticker(&self, ticker: &str) -> Result<bool> {
        Ok(self.base_prices.contains_key(ticker))
    }
}
