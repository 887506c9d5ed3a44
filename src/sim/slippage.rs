//! Slippage Model
//!
//! Simulated market impact: execution price deviates from the reference
//! price by a rate that grows with order value, up to a hard cap.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::types::OrderSide;

/// Slippage model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageModel {
    /// Base slippage rate applied to every order (e.g. 0.0001 = 1 bp)
    pub base_rate: Decimal,
    /// Additional rate per $1,000 of order value
    pub size_impact_rate: Decimal,
    /// Maximum slippage rate regardless of order size
    pub max_rate: Decimal,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self {
            base_rate: dec!(0.0001),
            size_impact_rate: dec!(0.00001),
            max_rate: dec!(0.01),
        }
    }
}

impl SlippageModel {
    /// Effective slippage rate for an order of the given dollar value
    pub fn rate(&self, order_value: Decimal) -> Decimal {
        let rate = self.base_rate + (order_value / dec!(1000)) * self.size_impact_rate;
        rate.min(self.max_rate)
    }

    /// Signed price offset for an order
    ///
    /// Positive for BUY (pays more than reference), negative for SELL
    /// (receives less).
    pub fn price_offset(
        &self,
        side: OrderSide,
        reference_price: Decimal,
        quantity: Decimal,
    ) -> Decimal {
        let offset = self.rate(reference_price * quantity) * reference_price;
        match side {
            OrderSide::Buy => offset,
            OrderSide::Sell => -offset,
        }
    }
}
