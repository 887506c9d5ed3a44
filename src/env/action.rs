//! Action space types shared by policies and the trading environment.
//!
//! Policies emit a typed [`AgentAction`]; the environment decodes it into
//! per-ticker [`TradeIntent`]s without ever inspecting raw tensors. The one
//! place untyped policy output is still tolerated is [`AgentAction::from_raw`],
//! kept as a legacy adapter at the policy/environment boundary.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TradegymError};

/// Signal strength below which a continuous value is treated as HOLD
pub const HOLD_THRESHOLD: f64 = 0.1;
/// Fraction of cash committed by a discrete BUY
pub const DISCRETE_BUY_FRACTION: f64 = 0.1;
/// Fraction of the held quantity released by a discrete SELL
pub const DISCRETE_SELL_FRACTION: f64 = 0.1;
/// Cash multiplier applied to a continuous BUY signal
pub const CONTINUOUS_BUY_SCALE: f64 = 0.5;

/// Shape of the action interface a policy trains against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionSpaceKind {
    Discrete,
    Continuous,
}

impl ActionSpaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discrete => "DISCRETE",
            Self::Continuous => "CONTINUOUS",
        }
    }

    /// Number of action slots a policy head must produce for `ticker_count`
    pub fn action_dim(&self, ticker_count: usize) -> usize {
        match self {
            Self::Discrete => discrete_action_count(ticker_count),
            Self::Continuous => ticker_count,
        }
    }
}

impl Default for ActionSpaceKind {
    fn default() -> Self {
        Self::Discrete
    }
}

impl std::fmt::Display for ActionSpaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionSpaceKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "discrete" => Ok(Self::Discrete),
            "continuous" => Ok(Self::Continuous),
            _ => Err("invalid action space; expected DISCRETE or CONTINUOUS"),
        }
    }
}

pub fn parse_action_space(raw: &str) -> Result<ActionSpaceKind> {
    ActionSpaceKind::from_str(raw).map_err(|e| TradegymError::Validation(e.to_string()))
}

/// Size of the combinatorial discrete space: one HOLD/BUY/SELL digit per ticker
pub fn discrete_action_count(ticker_count: usize) -> usize {
    3usize.saturating_pow(ticker_count as u32)
}

/// Typed action produced by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentAction {
    /// Index into the base-3 intent table, least-significant digit first
    Discrete(usize),
    /// One signal per ticker in `[-1, 1]`
    Continuous(Vec<f64>),
}

impl AgentAction {
    pub fn discrete(index: usize) -> Self {
        Self::Discrete(index)
    }

    /// Build a continuous action, clamping every signal into `[-1, 1]`.
    /// Non-finite values collapse to 0 (HOLD).
    pub fn continuous(values: Vec<f64>) -> Self {
        let clamped = values
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 })
            .collect();
        Self::Continuous(clamped)
    }

    pub fn space(&self) -> ActionSpaceKind {
        match self {
            Self::Discrete(_) => ActionSpaceKind::Discrete,
            Self::Continuous(_) => ActionSpaceKind::Continuous,
        }
    }

    /// Legacy adapter for untyped policy output.
    ///
    /// A single value is taken as the action index itself; anything longer is
    /// read as logits and reduced by arg-max. Prefer the typed constructors.
    pub fn from_raw(raw: &[f64]) -> Self {
        let index = match raw {
            [] => 0,
            [value] => {
                if value.is_finite() && *value > 0.0 {
                    *value as usize
                } else {
                    0
                }
            }
            values => argmax(values),
        };
        Self::Discrete(index)
    }

    /// Decode into one intent per ticker, in ticker order
    pub fn intents(&self, ticker_count: usize) -> Vec<TradeIntent> {
        match self {
            Self::Discrete(index) => {
                let mut intents = Vec::with_capacity(ticker_count);
                let mut rest = *index;
                for _ in 0..ticker_count {
                    let digit = rest % 3;
                    rest /= 3;
                    intents.push(match digit {
                        1 => TradeIntent::Buy {
                            cash_fraction: DISCRETE_BUY_FRACTION,
                        },
                        2 => TradeIntent::Sell {
                            quantity_fraction: DISCRETE_SELL_FRACTION,
                        },
                        _ => TradeIntent::Hold,
                    });
                }
                intents
            }
            Self::Continuous(values) => (0..ticker_count)
                .map(|i| match values.get(i) {
                    Some(&v) if v.abs() >= HOLD_THRESHOLD => {
                        if v > 0.0 {
                            TradeIntent::Buy {
                                cash_fraction: v.abs() * CONTINUOUS_BUY_SCALE,
                            }
                        } else {
                            TradeIntent::Sell {
                                quantity_fraction: v.abs(),
                            }
                        }
                    }
                    _ => TradeIntent::Hold,
                })
                .collect(),
        }
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v.is_finite() && v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Per-ticker trading decision decoded from an [`AgentAction`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeIntent {
    Hold,
    /// Commit this fraction of current cash as the order budget
    Buy { cash_fraction: f64 },
    /// Release this fraction of the held quantity
    Sell { quantity_fraction: f64 },
}

impl TradeIntent {
    pub fn is_hold(&self) -> bool {
        matches!(self, Self::Hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_index_decodes_least_significant_digit_first() {
        // 5 = 2 + 1*3: SELL on the first ticker, BUY on the second
        let intents = AgentAction::discrete(5).intents(2);
        assert_eq!(
            intents,
            vec![
                TradeIntent::Sell {
                    quantity_fraction: DISCRETE_SELL_FRACTION
                },
                TradeIntent::Buy {
                    cash_fraction: DISCRETE_BUY_FRACTION
                },
            ]
        );
    }

    #[test]
    fn discrete_zero_holds_every_ticker() {
        let intents = AgentAction::discrete(0).intents(3);
        assert!(intents.iter().all(TradeIntent::is_hold));
    }

    #[test]
    fn continuous_signals_map_to_scaled_intents() {
        let action = AgentAction::continuous(vec![0.05, 0.6, -0.5]);
        let intents = action.intents(3);
        assert_eq!(intents[0], TradeIntent::Hold);
        assert_eq!(
            intents[1],
            TradeIntent::Buy {
                cash_fraction: 0.6 * CONTINUOUS_BUY_SCALE
            }
        );
        assert_eq!(
            intents[2],
            TradeIntent::Sell {
                quantity_fraction: 0.5
            }
        );
    }

    #[test]
    fn continuous_constructor_clamps_out_of_range_signals() {
        let action = AgentAction::continuous(vec![2.0, -3.0, f64::NAN]);
        match action {
            AgentAction::Continuous(values) => assert_eq!(values, vec![1.0, -1.0, 0.0]),
            other => panic!("expected continuous action, got {other:?}"),
        }
    }

    #[test]
    fn from_raw_unwraps_scalars_and_argmaxes_vectors() {
        assert_eq!(AgentAction::from_raw(&[]), AgentAction::Discrete(0));
        assert_eq!(AgentAction::from_raw(&[4.7]), AgentAction::Discrete(4));
        assert_eq!(AgentAction::from_raw(&[-2.0]), AgentAction::Discrete(0));
        assert_eq!(AgentAction::from_raw(&[f64::NAN]), AgentAction::Discrete(0));
        assert_eq!(
            AgentAction::from_raw(&[0.1, 0.9, 0.3]),
            AgentAction::Discrete(1)
        );
    }

    #[test]
    fn action_dims_follow_the_space() {
        assert_eq!(ActionSpaceKind::Discrete.action_dim(2), 9);
        assert_eq!(ActionSpaceKind::Continuous.action_dim(2), 2);
        assert_eq!(discrete_action_count(0), 1);
    }

    #[test]
    fn action_space_parses_case_insensitively() {
        assert_eq!(
            parse_action_space("DISCRETE").expect("should parse"),
            ActionSpaceKind::Discrete
        );
        assert_eq!(
            parse_action_space("continuous").expect("should parse"),
            ActionSpaceKind::Continuous
        );
        assert!(parse_action_space("hybrid").is_err());
    }
}
