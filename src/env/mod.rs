//! Gym-style trading environment for RL training.
//!
//! Wraps the order executor and market data behind a reset/step interface:
//! typed actions in, observation vectors and shaped rewards out.

pub mod action;
pub mod indicators;
pub mod observation;
pub mod reward;
pub mod trading;

pub use action::{
    discrete_action_count, parse_action_space, ActionSpaceKind, AgentAction, TradeIntent,
};
pub use indicators::{BollingerPosition, Indicator, IndicatorSet, MacdSignal, Rsi, SmaRatio};
pub use observation::{ObservationBuilder, TickerHistory};
pub use reward::{
    max_drawdown, sharpe_ratio, RewardContext, RewardFunction, RiskAdjustedReward,
};
pub use trading::{EnvConfig, StepInfo, StepOutcome, TradingEnvironment};
