//! Cost-aware order fill engine: slippage, fees, and portfolio bookkeeping.

pub mod executor;
pub mod fees;
pub mod slippage;
pub mod types;

pub use executor::{CostPreview, OrderExecutor};
pub use fees::FeeSchedule;
pub use slippage::SlippageModel;
pub use types::{OrderRequest, OrderSide, PortfolioState, Position, RiskProfile, TradeFill};
