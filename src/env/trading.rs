//! Episodic trading environment driving the simulated portfolio.
//!
//! Each step decodes the agent action into per-ticker orders, executes them
//! against the portfolio, pulls one fresh market sample per ticker, and
//! scores the transition. Episodes end on bankruptcy or after the configured
//! number of steps; `reset` starts the next one.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::action::{ActionSpaceKind, AgentAction, TradeIntent};
use crate::env::indicators::IndicatorSet;
use crate::env::observation::{ObservationBuilder, TickerHistory};
use crate::env::reward::{RewardContext, RewardFunction, RiskAdjustedReward};
use crate::error::{OrderError, Result, TradegymError};
use crate::market::MarketDataSource;
use crate::sim::{OrderExecutor, OrderRequest, PortfolioState, RiskProfile};

/// Episode ends when NAV falls below this fraction of the initial budget
const BANKRUPTCY_FRACTION: Decimal = dec!(0.1);
/// Added to the (already clipped) reward on bankruptcy
const BANKRUPTCY_PENALTY: f64 = -10.0;
/// Reward volatility term looks at most this many trailing returns
const TRAILING_RETURNS: usize = 20;

fn default_initial_cash() -> Decimal {
    dec!(10_000)
}

fn default_max_steps() -> usize {
    1_000
}

fn default_lookback_window() -> usize {
    30
}

/// Environment parameters for one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub tickers: Vec<String>,
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,
    #[serde(default)]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub action_space: ActionSpaceKind,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            initial_cash: default_initial_cash(),
            max_steps: default_max_steps(),
            lookback_window: default_lookback_window(),
            risk_profile: RiskProfile::default(),
            action_space: ActionSpaceKind::default(),
        }
    }
}

impl EnvConfig {
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.tickers.is_empty() {
            problems.push("tickers must not be empty".to_string());
        }
        if self.initial_cash <= Decimal::ZERO {
            problems.push("initial_cash must be positive".to_string());
        }
        if self.max_steps == 0 {
            problems.push("max_steps must be positive".to_string());
        }
        if self.lookback_window == 0 {
            problems.push("lookback_window must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TradegymError::Validation(problems.join("; ")))
        }
    }
}

/// Result of one environment step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Diagnostics attached to every step
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub nav: Decimal,
    pub cash: Decimal,
    pub step: usize,
    pub position_count: usize,
    /// Fees paid by orders executed this step
    pub fees: Decimal,
}

/// Simulated multi-ticker trading episode
pub struct TradingEnvironment {
    config: EnvConfig,
    market: Arc<dyn MarketDataSource>,
    executor: OrderExecutor,
    reward: Box<dyn RewardFunction>,
    indicators: IndicatorSet,
    obs_builder: ObservationBuilder,
    portfolio: PortfolioState,
    current_prices: HashMap<String, Decimal>,
    history: HashMap<String, TickerHistory>,
    nav_history: Vec<f64>,
    returns_history: Vec<f64>,
    peak_nav: f64,
    step_count: usize,
    done: bool,
}

impl TradingEnvironment {
    pub fn new(config: EnvConfig, market: Arc<dyn MarketDataSource>) -> Result<Self> {
        config.validate()?;

        let indicators = IndicatorSet::standard();
        let obs_builder = ObservationBuilder::new(
            config.tickers.clone(),
            config.lookback_window,
            config.initial_cash,
            indicators.len(),
        );
        let portfolio = PortfolioState::new(config.initial_cash);
        let initial_nav = config.initial_cash.to_f64().unwrap_or(0.0);

        Ok(Self {
            history: config
                .tickers
                .iter()
                .map(|t| (t.clone(), TickerHistory::default()))
                .collect(),
            portfolio,
            obs_builder,
            indicators,
            config,
            market,
            executor: OrderExecutor::default(),
            reward: Box::new(RiskAdjustedReward::default()),
            current_prices: HashMap::new(),
            nav_history: vec![initial_nav],
            returns_history: Vec::new(),
            peak_nav: initial_nav,
            step_count: 0,
            done: false,
        })
    }

    /// Swap the reward shaping
    pub fn with_reward(mut self, reward: Box<dyn RewardFunction>) -> Self {
        self.reward = reward;
        self
    }

    /// Swap the indicator pipeline. The observation layout follows the new
    /// set's length.
    pub fn with_indicators(mut self, indicators: IndicatorSet) -> Self {
        self.obs_builder = ObservationBuilder::new(
            self.config.tickers.clone(),
            self.config.lookback_window,
            self.config.initial_cash,
            indicators.len(),
        );
        self.indicators = indicators;
        self
    }

    pub fn with_executor(mut self, executor: OrderExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn observation_dim(&self) -> usize {
        self.obs_builder.observation_dim()
    }

    pub fn action_dim(&self) -> usize {
        self.config.action_space.action_dim(self.config.tickers.len())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn nav_history(&self) -> &[f64] {
        &self.nav_history
    }

    /// Current NAV; positions without a live price are valued at cost
    pub fn current_nav(&self) -> Decimal {
        let mut prices = self.current_prices.clone();
        for (ticker, position) in &self.portfolio.positions {
            prices.entry(ticker.clone()).or_insert(position.avg_cost);
        }
        self.portfolio.nav(&prices)
    }

    /// Start a new episode and return the first observation
    pub async fn reset(&mut self) -> Vec<f64> {
        self.portfolio = PortfolioState::new(self.config.initial_cash);
        self.current_prices.clear();
        self.history = self
            .config
            .tickers
            .iter()
            .map(|t| (t.clone(), TickerHistory::default()))
            .collect();
        let initial_nav = self.config.initial_cash.to_f64().unwrap_or(0.0);
        self.nav_history = vec![initial_nav];
        self.returns_history.clear();
        self.peak_nav = initial_nav;
        self.step_count = 0;
        self.done = false;

        self.advance_market().await;
        self.observation()
    }

    /// Execute one action and advance the episode.
    ///
    /// Orders rejected for funds or quantity are skipped without failing the
    /// step; anything else from the executor propagates.
    pub async fn step(&mut self, action: &AgentAction) -> Result<StepOutcome> {
        let prev_nav = self.current_nav();

        let intents = action.intents(self.config.tickers.len());
        let fees = self.apply_intents(&intents)?;

        self.advance_market().await;

        let current_nav = self.current_nav();
        let prev = prev_nav.to_f64().unwrap_or(0.0);
        let current = current_nav.to_f64().unwrap_or(0.0);

        let trailing_start = self.returns_history.len().saturating_sub(TRAILING_RETURNS);
        let ctx = RewardContext {
            prev_nav: prev,
            current_nav: current,
            fees: fees.to_f64().unwrap_or(0.0),
            risk_profile: self.config.risk_profile,
            trailing_returns: &self.returns_history[trailing_start..],
            peak_nav: self.peak_nav,
        };
        let mut reward = self.reward.compute(&ctx);

        self.nav_history.push(current);
        if prev > 0.0 {
            self.returns_history.push((current - prev) / prev);
        }
        self.peak_nav = self.peak_nav.max(current);
        self.step_count += 1;

        if current_nav < self.config.initial_cash * BANKRUPTCY_FRACTION {
            self.done = true;
            reward += BANKRUPTCY_PENALTY;
        } else if self.step_count >= self.config.max_steps {
            self.done = true;
        }

        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            done: self.done,
            info: StepInfo {
                nav: current_nav,
                cash: self.portfolio.cash,
                step: self.step_count,
                position_count: self.portfolio.position_count(),
                fees,
            },
        })
    }

    /// Route every non-HOLD intent through the executor; returns total fees
    fn apply_intents(&mut self, intents: &[TradeIntent]) -> Result<Decimal> {
        let mut fees = Decimal::ZERO;

        for (i, intent) in intents.iter().enumerate() {
            let ticker = &self.config.tickers[i];
            let request = match intent {
                TradeIntent::Hold => continue,
                TradeIntent::Buy { cash_fraction } => {
                    let Some(price) = self.current_prices.get(ticker).copied() else {
                        debug!(%ticker, "no price yet, skipping buy");
                        continue;
                    };
                    if price <= Decimal::ZERO {
                        continue;
                    }
                    let Some(fraction) = Decimal::from_f64(*cash_fraction) else {
                        continue;
                    };
                    let budget = self.portfolio.cash * fraction;
                    if budget <= Decimal::ZERO {
                        continue;
                    }
                    let quantity = budget / price;
                    let request = OrderRequest::buy(ticker, quantity, price);
                    let preview = self.executor.preview(&request, self.config.risk_profile);
                    // Shrink the order until the full cost fits the budget
                    if preview.total > budget && preview.total > Decimal::ZERO {
                        OrderRequest::buy(ticker, quantity * (budget / preview.total), price)
                    } else {
                        request
                    }
                }
                TradeIntent::Sell { quantity_fraction } => {
                    let Some(position) = self.portfolio.position(ticker) else {
                        continue;
                    };
                    let Some(fraction) = Decimal::from_f64(*quantity_fraction) else {
                        continue;
                    };
                    let quantity = position.quantity * fraction;
                    if quantity <= Decimal::ZERO {
                        continue;
                    }
                    let price = self
                        .current_prices
                        .get(ticker)
                        .copied()
                        .unwrap_or(position.avg_cost);
                    OrderRequest::sell(ticker, quantity, price)
                }
            };

            match self
                .executor
                .execute(&request, &mut self.portfolio, self.config.risk_profile)
            {
                Ok(fill) => {
                    debug!(
                        ticker = %fill.ticker,
                        side = %fill.side,
                        quantity = %fill.quantity,
                        price = %fill.execution_price,
                        fees = %fill.fees,
                        "order filled"
                    );
                    fees += fill.fees;
                }
                Err(err @ (OrderError::InsufficientFunds { .. }
                | OrderError::InsufficientQuantity { .. })) => {
                    debug!(%ticker, error = %err, "order skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(fees)
    }

    /// Pull one fresh sample per ticker. A failed ticker keeps its last
    /// known price and history.
    async fn advance_market(&mut self) {
        for ticker in self.config.tickers.clone() {
            match self.market.latest_quote(&ticker).await {
                Ok(quote) => {
                    let close = quote.close.to_f64().unwrap_or(0.0);
                    let history = self.history.entry(ticker.clone()).or_default();
                    history.push(close, quote.volume as f64);
                    history.trim_to(2 * self.config.lookback_window);
                    self.current_prices.insert(ticker, quote.price);
                }
                Err(err) => {
                    debug!(%ticker, error = %err, "market data unavailable, keeping last price");
                }
            }
        }
    }

    fn observation(&self) -> Vec<f64> {
        let indicator_values: HashMap<String, Vec<f64>> = self
            .config
            .tickers
            .iter()
            .map(|ticker| {
                let closes = self
                    .history
                    .get(ticker)
                    .map(|h| h.closes.as_slice())
                    .unwrap_or(&[]);
                (ticker.clone(), self.indicators.compute_all(closes))
            })
            .collect();

        self.obs_builder.build(
            &self.portfolio,
            &self.current_prices,
            &self.history,
            &indicator_values,
            self.current_nav(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Quote;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    /// Scripted price source: each ticker walks its sequence one sample per
    /// call, repeating the last entry, optionally failing after a set number
    /// of calls.
    struct FixedMarketData {
        sequences: HashMap<String, Vec<Decimal>>,
        cursors: Mutex<HashMap<String, usize>>,
        fail_after: Option<usize>,
    }

    impl FixedMarketData {
        fn new(sequences: Vec<(&str, Vec<Decimal>)>) -> Self {
            Self {
                sequences: sequences
                    .into_iter()
                    .map(|(t, s)| (t.to_string(), s))
                    .collect(),
                cursors: Mutex::new(HashMap::new()),
                fail_after: None,
            }
        }

        fn constant(ticker: &str, price: Decimal) -> Self {
            Self::new(vec![(ticker, vec![price])])
        }

        fn failing_after(mut self, calls: usize) -> Self {
            self.fail_after = Some(calls);
            self
        }
    }

    #[async_trait]
    impl MarketDataSource for FixedMarketData {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn latest_quote(&self, ticker: &str) -> Result<Quote> {
            let sequence = self
                .sequences
                .get(ticker)
                .ok_or_else(|| TradegymError::DataUnavailable(ticker.to_string()))?;
            let mut cursors = self.cursors.lock().await;
            let cursor = cursors.entry(ticker.to_string()).or_insert(0);
            if let Some(limit) = self.fail_after {
                if *cursor >= limit {
                    return Err(TradegymError::DataUnavailable(format!(
                        "{ticker} feed down"
                    )));
                }
            }
            let price = sequence[(*cursor).min(sequence.len() - 1)];
            *cursor += 1;
            Ok(Quote {
                ticker: ticker.to_string(),
                price,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1_000_000,
                timestamp: Utc::now(),
            })
        }

        async fn validate_ticker(&self, ticker: &str) -> Result<bool> {
            Ok(self.sequences.contains_key(ticker))
        }
    }

    fn env_config(tickers: &[&str]) -> EnvConfig {
        EnvConfig {
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            ..EnvConfig::default()
        }
    }

    fn constant_env(price: Decimal) -> TradingEnvironment {
        let market = Arc::new(FixedMarketData::constant("TEST", price));
        TradingEnvironment::new(env_config(&["TEST"]), market).expect("valid config")
    }

    #[tokio::test]
    async fn reset_restores_cash_and_primes_history() {
        let mut env = constant_env(dec!(100));
        let obs = env.reset().await;
        assert_eq!(obs.len(), env.observation_dim());
        assert_eq!(env.portfolio().cash, dec!(10_000));
        assert_eq!(env.current_nav(), dec!(10_000));
        assert_eq!(env.step_count(), 0);
        assert!(!env.is_done());
    }

    #[tokio::test]
    async fn discrete_buy_commits_a_tenth_of_cash() {
        let mut env = constant_env(dec!(100));
        env.reset().await;

        // Base-3 digit 1 on the only ticker
        let outcome = env.step(&AgentAction::discrete(1)).await.expect("step");

        let position = env.portfolio().position("TEST").expect("position opened");
        assert!(position.quantity > dec!(9.99) && position.quantity < dec!(10));
        assert!(env.portfolio().cash > dec!(9_000) && env.portfolio().cash < dec!(9_001));
        assert!(outcome.info.fees > Decimal::ZERO);
        assert_eq!(outcome.info.position_count, 1);
        assert!(!outcome.done);
    }

    #[tokio::test]
    async fn sell_without_a_position_is_skipped() {
        let mut env = constant_env(dec!(100));
        env.reset().await;

        // Base-3 digit 2 = SELL
        let outcome = env.step(&AgentAction::discrete(2)).await.expect("step");
        assert_eq!(env.portfolio().cash, dec!(10_000));
        assert_eq!(outcome.info.fees, Decimal::ZERO);
        assert_eq!(outcome.info.position_count, 0);
    }

    #[tokio::test]
    async fn buy_then_sell_round_trip_keeps_books_consistent() {
        let mut env = constant_env(dec!(100));
        env.reset().await;

        env.step(&AgentAction::discrete(1)).await.expect("buy");
        let before = env.portfolio().position("TEST").expect("position").quantity;
        env.step(&AgentAction::discrete(2)).await.expect("sell");
        let after = env.portfolio().position("TEST").expect("position").quantity;

        // A discrete sell releases a tenth of the holding
        let expected = before * dec!(0.9);
        assert!((after - expected).abs() < dec!(0.0001));
        assert!(env.portfolio().cash > dec!(9_000));
    }

    #[tokio::test]
    async fn hold_leaves_the_portfolio_untouched() {
        let mut env = constant_env(dec!(100));
        env.reset().await;

        let outcome = env.step(&AgentAction::discrete(0)).await.expect("step");
        assert_eq!(env.portfolio().cash, dec!(10_000));
        assert_eq!(outcome.reward, 0.0);
        assert_eq!(outcome.info.fees, Decimal::ZERO);
    }

    #[tokio::test]
    async fn bankruptcy_terminates_with_a_penalty_past_the_clip() {
        let sequence = vec![
            dec!(100),
            dec!(100),
            dec!(100),
            dec!(100),
            dec!(0.01),
        ];
        let market = Arc::new(FixedMarketData::new(vec![("TEST", sequence)]));
        let mut env =
            TradingEnvironment::new(env_config(&["TEST"]), market).expect("valid config");
        env.reset().await;

        // Go all-in repeatedly; the final step crashes the price
        let all_in = AgentAction::continuous(vec![1.0]);
        let mut last = None;
        for _ in 0..4 {
            let outcome = env.step(&all_in).await.expect("step");
            let done = outcome.done;
            last = Some(outcome);
            if done {
                break;
            }
        }

        let outcome = last.expect("at least one step");
        assert!(outcome.done, "price collapse should end the episode");
        assert!(
            outcome.reward < -19.0,
            "clipped loss plus penalty, got {}",
            outcome.reward
        );
        assert!(outcome.info.nav < dec!(1_000));
    }

    #[tokio::test]
    async fn episode_ends_at_max_steps_without_penalty() {
        let market = Arc::new(FixedMarketData::constant("TEST", dec!(100)));
        let config = EnvConfig {
            max_steps: 3,
            ..env_config(&["TEST"])
        };
        let mut env = TradingEnvironment::new(config, market).expect("valid config");
        env.reset().await;

        let mut outcome = None;
        for _ in 0..3 {
            outcome = Some(env.step(&AgentAction::discrete(0)).await.expect("step"));
        }
        let outcome = outcome.expect("three steps");
        assert!(outcome.done);
        assert!(outcome.reward > -1.0);
        assert_eq!(outcome.info.step, 3);

        // Reset starts a fresh episode
        let obs = env.reset().await;
        assert_eq!(obs.len(), env.observation_dim());
        assert!(!env.is_done());
        assert_eq!(env.portfolio().cash, dec!(10_000));
    }

    #[tokio::test]
    async fn dead_feed_keeps_the_last_known_price() {
        // One successful fetch (reset), then the feed goes dark
        let market =
            Arc::new(FixedMarketData::constant("TEST", dec!(100)).failing_after(1));
        let mut env =
            TradingEnvironment::new(env_config(&["TEST"]), market).expect("valid config");
        env.reset().await;

        let outcome = env.step(&AgentAction::discrete(1)).await.expect("step");
        assert!(!outcome.done);
        // The buy executed at the cached price and NAV stays priced
        assert!(outcome.info.nav > dec!(9_990));
        assert_eq!(outcome.info.position_count, 1);
    }

    #[tokio::test]
    async fn action_dims_follow_the_configured_space() {
        let market = Arc::new(FixedMarketData::new(vec![
            ("A", vec![dec!(10)]),
            ("B", vec![dec!(10)]),
        ]));
        let discrete =
            TradingEnvironment::new(env_config(&["A", "B"]), market.clone()).expect("env");
        assert_eq!(discrete.action_dim(), 9);

        let config = EnvConfig {
            action_space: ActionSpaceKind::Continuous,
            ..env_config(&["A", "B"])
        };
        let continuous = TradingEnvironment::new(config, market).expect("env");
        assert_eq!(continuous.action_dim(), 2);
    }

    #[test]
    fn config_validation_collects_problems() {
        let config = EnvConfig {
            tickers: Vec::new(),
            initial_cash: Decimal::ZERO,
            ..EnvConfig::default()
        };
        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("tickers"));
        assert!(message.contains("initial_cash"));
    }
}
