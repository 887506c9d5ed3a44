//! Observation vector assembly for the trading environment.
//!
//! The layout is fixed at construction: a portfolio block, a per-ticker
//! market history block, and a per-ticker indicator block. Policies size
//! their input layer from [`ObservationBuilder::observation_dim`], so the
//! builder must emit exactly that many values on every call.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::sim::PortfolioState;

/// Values emitted per timestep in the market block: price, volume, return
const MARKET_CHANNELS: usize = 3;

/// Close/volume history for one ticker, oldest first
#[derive(Debug, Clone, Default)]
pub struct TickerHistory {
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl TickerHistory {
    pub fn push(&mut self, close: f64, volume: f64) {
        self.closes.push(close);
        self.volumes.push(volume);
    }

    /// Drop the oldest samples beyond `max`
    pub fn trim_to(&mut self, max: usize) {
        if self.closes.len() > max {
            self.closes.drain(..self.closes.len() - max);
        }
        if self.volumes.len() > max {
            self.volumes.drain(..self.volumes.len() - max);
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }
}

/// Deterministic observation assembly over portfolio, market, and indicator
/// state
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    tickers: Vec<String>,
    lookback_window: usize,
    initial_budget: f64,
    indicator_slots: usize,
}

impl ObservationBuilder {
    pub fn new(
        tickers: Vec<String>,
        lookback_window: usize,
        initial_budget: Decimal,
        indicator_slots: usize,
    ) -> Self {
        Self {
            tickers,
            lookback_window,
            initial_budget: initial_budget.to_f64().unwrap_or(0.0),
            indicator_slots,
        }
    }

    /// Total vector length: `1 + 2T + 3TW + kT` for T tickers, window W and
    /// k indicator slots
    pub fn observation_dim(&self) -> usize {
        let t = self.tickers.len();
        1 + 2 * t + MARKET_CHANNELS * t * self.lookback_window + self.indicator_slots * t
    }

    /// Assemble the full observation.
    ///
    /// `indicators` carries raw indicator values per ticker; they are scaled
    /// positionally for the standard five-slot layout (oscillator to `[0,1]`,
    /// trend signal clipped to `[-1,1]`).
    pub fn build(
        &self,
        portfolio: &PortfolioState,
        current_prices: &HashMap<String, Decimal>,
        history: &HashMap<String, TickerHistory>,
        indicators: &HashMap<String, Vec<f64>>,
        nav: Decimal,
    ) -> Vec<f64> {
        let mut observation = Vec::with_capacity(self.observation_dim());

        self.push_portfolio_block(&mut observation, portfolio, current_prices, nav);
        for ticker in &self.tickers {
            self.push_market_block(&mut observation, history.get(ticker));
        }
        for ticker in &self.tickers {
            self.push_indicator_block(&mut observation, indicators.get(ticker));
        }

        observation
    }

    fn push_portfolio_block(
        &self,
        out: &mut Vec<f64>,
        portfolio: &PortfolioState,
        current_prices: &HashMap<String, Decimal>,
        nav: Decimal,
    ) {
        let cash = portfolio.cash.to_f64().unwrap_or(0.0);
        let cash_ratio = if self.initial_budget > 0.0 {
            cash / self.initial_budget
        } else {
            0.0
        };
        out.push(cash_ratio);

        let nav = nav.to_f64().unwrap_or(0.0);
        for ticker in &self.tickers {
            match (portfolio.position(ticker), current_prices.get(ticker)) {
                (Some(position), Some(price)) => {
                    let market_value = position.market_value(*price).to_f64().unwrap_or(0.0);
                    out.push(if nav > 0.0 { market_value / nav } else { 0.0 });
                    out.push(position.unrealized_pnl_pct(*price).to_f64().unwrap_or(0.0) / 100.0);
                }
                _ => {
                    out.push(0.0);
                    out.push(0.0);
                }
            }
        }
    }

    fn push_market_block(&self, out: &mut Vec<f64>, history: Option<&TickerHistory>) {
        let window = self.lookback_window;
        let history = match history {
            Some(h) if !h.is_empty() => h,
            _ => {
                out.extend(std::iter::repeat(0.0).take(window * MARKET_CHANNELS));
                return;
            }
        };

        let start = history.len().saturating_sub(window);
        let recent_closes = &history.closes[start..];
        let recent_volumes = &history.volumes[start..];

        // Left-pad short histories by repeating the earliest sample
        let pad = window - recent_closes.len();
        let mut closes = Vec::with_capacity(window);
        let mut volumes = Vec::with_capacity(window);
        closes.extend(std::iter::repeat(recent_closes[0]).take(pad));
        volumes.extend(std::iter::repeat(recent_volumes[0]).take(pad));
        closes.extend_from_slice(recent_closes);
        volumes.extend_from_slice(recent_volumes);

        let normalized_closes = z_score(&closes);
        let normalized_volumes = z_score(&volumes);

        let mut returns = vec![0.0; window];
        for i in 1..window {
            if closes[i - 1] > 0.0 && closes[i] > 0.0 {
                returns[i] = (closes[i] / closes[i - 1]).ln();
            }
        }

        for i in 0..window {
            out.push(normalized_closes[i]);
            out.push(normalized_volumes[i]);
            out.push(returns[i]);
        }
    }

    fn push_indicator_block(&self, out: &mut Vec<f64>, values: Option<&Vec<f64>>) {
        for slot in 0..self.indicator_slots {
            let raw = values.and_then(|v| v.get(slot)).copied().unwrap_or(0.0);
            out.push(scale_indicator_slot(slot, raw));
        }
    }
}

/// Positional scaling for the standard indicator layout: slot 2 is an
/// oscillator in `[0,100]`, slot 3 a trend signal clipped to `[-1,1]`
fn scale_indicator_slot(slot: usize, raw: f64) -> f64 {
    match slot {
        2 => raw / 100.0,
        3 => raw.clamp(-1.0, 1.0),
        _ => raw,
    }
}

/// Z-score against the window's own mean and population stddev; a flat
/// window falls back to a divisor of 1.0
fn z_score(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    let std = var.sqrt();
    let divisor = if std > 0.0 { std } else { 1.0 };
    values.iter().map(|v| (v - mean) / divisor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn builder(tickers: &[&str], window: usize) -> ObservationBuilder {
        ObservationBuilder::new(
            tickers.iter().map(|t| t.to_string()).collect(),
            window,
            dec!(10_000),
            5,
        )
    }

    #[test]
    fn observation_dim_matches_the_layout() {
        let b = builder(&["AAPL", "MSFT"], 30);
        assert_eq!(b.observation_dim(), 1 + 4 + 180 + 10);
    }

    #[test]
    fn emits_exactly_dim_values_with_no_history() {
        let b = builder(&["AAPL"], 30);
        let portfolio = PortfolioState::new(dec!(10_000));
        let obs = b.build(
            &portfolio,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
            dec!(10_000),
        );
        assert_eq!(obs.len(), b.observation_dim());
        // Cash ratio leads, market block is all zeros
        assert_eq!(obs[0], 1.0);
        assert!(obs[3..93].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn flat_history_normalizes_to_zeros() {
        let b = builder(&["AAPL"], 4);
        let mut history = HashMap::new();
        let mut h = TickerHistory::default();
        for _ in 0..4 {
            h.push(100.0, 5_000.0);
        }
        history.insert("AAPL".to_string(), h);

        let obs = b.build(
            &PortfolioState::new(dec!(10_000)),
            &HashMap::new(),
            &history,
            &HashMap::new(),
            dec!(10_000),
        );
        let market = &obs[3..3 + 12];
        assert!(market.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn market_block_interleaves_price_volume_return() {
        let b = builder(&["AAPL"], 2);
        let mut history = HashMap::new();
        let mut h = TickerHistory::default();
        h.push(100.0, 5_000.0);
        h.push(102.0, 5_000.0);
        history.insert("AAPL".to_string(), h);

        let obs = b.build(
            &PortfolioState::new(dec!(10_000)),
            &HashMap::new(),
            &history,
            &HashMap::new(),
            dec!(10_000),
        );
        let market = &obs[3..3 + 6];
        // Prices z-score to [-1, 1]; flat volume to zero; one log return
        assert!((market[0] + 1.0).abs() < 1e-9);
        assert_eq!(market[1], 0.0);
        assert_eq!(market[2], 0.0);
        assert!((market[3] - 1.0).abs() < 1e-9);
        assert_eq!(market[4], 0.0);
        assert!((market[5] - (102.0f64 / 100.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn short_history_left_pads_with_the_earliest_sample() {
        let b = builder(&["AAPL"], 4);
        let mut history = HashMap::new();
        let mut h = TickerHistory::default();
        h.push(100.0, 1_000.0);
        h.push(110.0, 2_000.0);
        history.insert("AAPL".to_string(), h);

        let obs = b.build(
            &PortfolioState::new(dec!(10_000)),
            &HashMap::new(),
            &history,
            &HashMap::new(),
            dec!(10_000),
        );
        let market = &obs[3..3 + 12];
        // Padded timesteps replicate the earliest sample
        assert_eq!(market[0], market[3]);
        assert_eq!(market[1], market[4]);
        // Returns over the pad are zero; the real move lands on the last step
        assert_eq!(market[2], 0.0);
        assert_eq!(market[5], 0.0);
        assert_eq!(market[8], 0.0);
        assert!((market[11] - (110.0f64 / 100.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn portfolio_block_reports_position_ratios() {
        let b = builder(&["AAPL"], 2);
        let mut portfolio = PortfolioState::new(dec!(5_000));
        portfolio.positions.insert(
            "AAPL".to_string(),
            crate::sim::Position {
                ticker: "AAPL".to_string(),
                quantity: dec!(10),
                avg_cost: dec!(100),
            },
        );
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), dec!(110));
        let nav = portfolio.nav(&prices);

        let obs = b.build(&portfolio, &prices, &HashMap::new(), &HashMap::new(), nav);
        assert!((obs[0] - 0.5).abs() < 1e-12);
        // 1100 market value against 6100 NAV
        assert!((obs[1] - 1100.0 / 6100.0).abs() < 1e-9);
        // +10% unrealized, scaled by 100
        assert!((obs[2] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn indicator_block_scales_positionally() {
        let b = builder(&["AAPL"], 1);
        let mut indicators = HashMap::new();
        indicators.insert("AAPL".to_string(), vec![0.1, -0.2, 75.0, 3.0, 0.8]);

        let obs = b.build(
            &PortfolioState::new(dec!(10_000)),
            &HashMap::new(),
            &HashMap::new(),
            &indicators,
            dec!(10_000),
        );
        let block = &obs[obs.len() - 5..];
        assert_eq!(block, &[0.1, -0.2, 0.75, 1.0, 0.8]);
    }

    #[test]
    fn trim_keeps_only_the_newest_samples() {
        let mut h = TickerHistory::default();
        for i in 0..10 {
            h.push(100.0 + i as f64, 1_000.0);
        }
        h.trim_to(4);
        assert_eq!(h.len(), 4);
        assert_eq!(h.closes, vec![106.0, 107.0, 108.0, 109.0]);
    }
}
