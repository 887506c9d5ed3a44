use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::TradegymError;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Account risk tier controlling fee rates and volatility penalties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Moderate => "moderate",
            RiskProfile::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RiskProfile {
    type Err = TradegymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "moderate" => Ok(RiskProfile::Moderate),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(TradegymError::Validation(format!(
                "Unknown risk profile: {other}"
            ))),
        }
    }
}

/// Order request (what we want to do)
///
/// Ephemeral: constructed per decision and consumed by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Market price at decision time (not the execution price)
    pub reference_price: Decimal,
}

impl OrderRequest {
    pub fn buy(ticker: impl Into<String>, quantity: Decimal, reference_price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            side: OrderSide::Buy,
            quantity,
            reference_price,
        }
    }

    pub fn sell(ticker: impl Into<String>, quantity: Decimal, reference_price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            side: OrderSide::Sell,
            quantity,
            reference_price,
        }
    }

    /// Dollar value of the order at the reference price
    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }
}

/// Immutable record of an executed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub execution_price: Decimal,
    /// Price impact magnitude (always reported positive)
    pub slippage: Decimal,
    pub fees: Decimal,
    pub executed_at: DateTime<Utc>,
    /// Always true: fills come from the paper broker, never a live venue
    pub simulated: bool,
}

impl TradeFill {
    /// Dollar value at the actual execution price
    pub fn notional(&self) -> Decimal {
        self.quantity * self.execution_price
    }
}

/// Holding in a single instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub quantity: Decimal,
    /// Quantity-weighted average entry price; only a BUY changes it
    pub avg_cost: Decimal,
}

impl Position {
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.quantity * (price - self.avg_cost)
    }

    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.avg_cost == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (price - self.avg_cost) / self.avg_cost * Decimal::from(100)
    }
}

/// Cash plus holdings for one episode
///
/// Mutated only by the order executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
}

impl PortfolioState {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: HashMap::new(),
        }
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Net asset value: cash plus mark-to-market value of all holdings
    ///
    /// Tickers missing from `prices` are valued at zero.
    pub fn nav(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let mut nav = self.cash;
        for (ticker, position) in &self.positions {
            if let Some(price) = prices.get(ticker) {
                nav += position.market_value(*price);
            }
        }
        nav
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_profile_parse() {
        assert_eq!(
            "conservative".parse::<RiskProfile>().unwrap(),
            RiskProfile::Conservative
        );
        assert_eq!(
            "Moderate".parse::<RiskProfile>().unwrap(),
            RiskProfile::Moderate
        );
        assert_eq!(
            "AGGRESSIVE".parse::<RiskProfile>().unwrap(),
            RiskProfile::Aggressive
        );
        assert!("yolo".parse::<RiskProfile>().is_err());
    }

    #[test]
    fn test_position_pnl() {
        let position = Position {
            ticker: "AAPL".to_string(),
            quantity: dec!(10),
            avg_cost: dec!(100),
        };

        assert_eq!(position.market_value(dec!(110)), dec!(1100));
        assert_eq!(position.unrealized_pnl(dec!(110)), dec!(100));
        assert_eq!(position.unrealized_pnl_pct(dec!(110)), dec!(10));
    }

    #[test]
    fn test_portfolio_nav() {
        let mut portfolio = PortfolioState::new(dec!(5000));
        portfolio.positions.insert(
            "AAPL".to_string(),
            Position {
                ticker: "AAPL".to_string(),
                quantity: dec!(10),
                avg_cost: dec!(100),
            },
        );

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), dec!(120));

        // 5000 cash + 10 * 120
        assert_eq!(portfolio.nav(&prices), dec!(6200));

        // Missing price values the position at zero
        assert_eq!(portfolio.nav(&HashMap::new()), dec!(5000));
    }
}
