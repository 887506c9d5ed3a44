//! Fee Model
//!
//! Commission is a percentage of notional keyed by the account risk tier,
//! floored at a minimum absolute fee. Conservative accounts pay the highest
//! rate, aggressive the lowest.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::types::RiskProfile;

/// Fee schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub conservative_rate: Decimal,
    pub moderate_rate: Decimal,
    pub aggressive_rate: Decimal,
    /// Minimum absolute fee per order
    pub min_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            conservative_rate: dec!(0.001),
            moderate_rate: dec!(0.0005),
            aggressive_rate: dec!(0.0002),
            min_fee: dec!(0.01),
        }
    }
}

impl FeeSchedule {
    /// Fee rate for a risk tier
    pub fn rate(&self, profile: RiskProfile) -> Decimal {
        match profile {
            RiskProfile::Conservative => self.conservative_rate,
            RiskProfile::Moderate => self.moderate_rate,
            RiskProfile::Aggressive => self.aggressive_rate,
        }
    }

    /// Commission for an order, floored at `min_fee`
    pub fn commission(
        &self,
        execution_price: Decimal,
        quantity: Decimal,
        profile: RiskProfile,
    ) -> Decimal {
        let fee = self.rate(profile) * execution_price * quantity;
        fee.max(self.min_fee)
    }
}
