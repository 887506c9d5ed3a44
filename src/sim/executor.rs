//! Order Executor
//!
//! Applies a priced order against portfolio cash/position state. Pure state
//! mutation: no I/O, no partial fills. All checks happen before any mutation
//! so a failed order leaves the portfolio untouched.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fees::FeeSchedule;
use super::slippage::SlippageModel;
use super::types::{OrderRequest, OrderSide, PortfolioState, Position, RiskProfile, TradeFill};
use crate::error::OrderError;

/// Projected execution costs for an order, before committing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostPreview {
    pub execution_price: Decimal,
    /// Signed price offset (+BUY / -SELL)
    pub slippage: Decimal,
    pub fees: Decimal,
    /// For BUY: cash required. For SELL: net proceeds.
    pub total: Decimal,
}

/// Executes orders and updates portfolio state
#[derive(Debug, Clone, Default)]
pub struct OrderExecutor {
    slippage: SlippageModel,
    fees: FeeSchedule,
}

impl OrderExecutor {
    pub fn new(slippage: SlippageModel, fees: FeeSchedule) -> Self {
        Self { slippage, fees }
    }

    /// Project execution price and costs without touching portfolio state
    pub fn preview(&self, order: &OrderRequest, profile: RiskProfile) -> CostPreview {
        let slippage = self
            .slippage
            .price_offset(order.side, order.reference_price, order.quantity);
        let execution_price = order.reference_price + slippage;
        let fees = self.fees.commission(execution_price, order.quantity, profile);
        let notional = execution_price * order.quantity;
        let total = match order.side {
            OrderSide::Buy => notional + fees,
            OrderSide::Sell => notional - fees,
        };

        CostPreview {
            execution_price,
            slippage,
            fees,
            total,
        }
    }

    /// Execute an order against the portfolio
    ///
    /// BUY debits cash and creates or re-averages the position. SELL credits
    /// net proceeds and removes the position entry when quantity reaches
    /// exactly zero.
    pub fn execute(
        &self,
        order: &OrderRequest,
        portfolio: &mut PortfolioState,
        profile: RiskProfile,
    ) -> Result<TradeFill, OrderError> {
        if order.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if order.reference_price <= Decimal::ZERO {
            return Err(OrderError::InvalidOrder(format!(
                "reference price must be positive, got {}",
                order.reference_price
            )));
        }

        let preview = self.preview(order, profile);

        match order.side {
            OrderSide::Buy => self.execute_buy(order, portfolio, &preview),
            OrderSide::Sell => self.execute_sell(order, portfolio, &preview),
        }
    }

    fn execute_buy(
        &self,
        order: &OrderRequest,
        portfolio: &mut PortfolioState,
        preview: &CostPreview,
    ) -> Result<TradeFill, OrderError> {
        if preview.total > portfolio.cash {
            return Err(OrderError::InsufficientFunds {
                required: preview.total,
                available: portfolio.cash,
            });
        }

        portfolio.cash -= preview.total;

        match portfolio.positions.get_mut(&order.ticker) {
            Some(position) => {
                let new_quantity = position.quantity + order.quantity;
                position.avg_cost = (position.quantity * position.avg_cost
                    + order.quantity * preview.execution_price)
                    / new_quantity;
                position.quantity = new_quantity;
            }
            None => {
                portfolio.positions.insert(
                    order.ticker.clone(),
                    Position {
                        ticker: order.ticker.clone(),
                        quantity: order.quantity,
                        avg_cost: preview.execution_price,
                    },
                );
            }
        }

        Ok(self.fill(order, preview))
    }

    fn execute_sell(
        &self,
        order: &OrderRequest,
        portfolio: &mut PortfolioState,
        preview: &CostPreview,
    ) -> Result<TradeFill, OrderError> {
        let held = portfolio
            .positions
            .get(&order.ticker)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);

        if order.quantity > held {
            return Err(OrderError::InsufficientQuantity {
                requested: order.quantity,
                held,
            });
        }

        // Dust sells below the minimum fee would drive cash negative
        if portfolio.cash + preview.total < Decimal::ZERO {
            return Err(OrderError::InsufficientFunds {
                required: -preview.total,
                available: portfolio.cash,
            });
        }

        portfolio.cash += preview.total;

        let remaining = held - order.quantity;
        if remaining == Decimal::ZERO {
            portfolio.positions.remove(&order.ticker);
        } else if let Some(position) = portfolio.positions.get_mut(&order.ticker) {
            position.quantity = remaining;
        }

        Ok(self.fill(order, preview))
    }

    fn fill(&self, order: &OrderRequest, preview: &CostPreview) -> TradeFill {
        TradeFill {
            ticker: order.ticker.clone(),
            side: order.side,
            quantity: order.quantity,
            execution_price: preview.execution_price,
            slippage: preview.slippage.abs(),
            fees: preview.fees,
            executed_at: Utc::now(),
            simulated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn zero_slippage_executor() -> OrderExecutor {
        OrderExecutor::new(
            SlippageModel {
                base_rate: Decimal::ZERO,
                size_impact_rate: Decimal::ZERO,
                max_rate: Decimal::ZERO,
            },
            FeeSchedule::default(),
        )
    }

    #[test]
    fn test_buy_creates_position_and_debits_cash() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(10000));

        let order = OrderRequest::buy("AAPL", dec!(10), dec!(100));
        let fill = executor
            .execute(&order, &mut portfolio, RiskProfile::Moderate)
            .unwrap();

        assert!(fill.simulated);
        assert!(fill.execution_price > dec!(100));
        assert!(fill.fees > Decimal::ZERO);
        assert!(portfolio.cash < dec!(9001));

        let position = portfolio.position("AAPL").unwrap();
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.avg_cost, fill.execution_price);
    }

    #[test]
    fn test_buy_insufficient_funds_leaves_state_untouched() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(100));

        let order = OrderRequest::buy("AAPL", dec!(10), dec!(100));
        let err = executor
            .execute(&order, &mut portfolio, RiskProfile::Moderate)
            .unwrap_err();

        assert!(matches!(err, OrderError::InsufficientFunds { .. }));
        assert_eq!(portfolio.cash, dec!(100));
        assert_eq!(portfolio.position_count(), 0);
    }

    #[test]
    fn test_sell_without_position_fails() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(10000));

        let order = OrderRequest::sell("AAPL", dec!(5), dec!(100));
        let err = executor
            .execute(&order, &mut portfolio, RiskProfile::Moderate)
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::InsufficientQuantity { held, .. } if held == Decimal::ZERO
        ));
    }

    #[test]
    fn test_sell_to_exactly_zero_removes_position() {
        let executor = zero_slippage_executor();
        let mut portfolio = PortfolioState::new(dec!(10000));

        let buy = OrderRequest::buy("AAPL", dec!(10), dec!(100));
        executor
            .execute(&buy, &mut portfolio, RiskProfile::Moderate)
            .unwrap();

        let sell = OrderRequest::sell("AAPL", dec!(10), dec!(100));
        executor
            .execute(&sell, &mut portfolio, RiskProfile::Moderate)
            .unwrap();

        assert_eq!(portfolio.position_count(), 0);
    }

    #[test]
    fn test_round_trip_costs_exactly_two_fees() {
        let executor = zero_slippage_executor();
        let mut portfolio = PortfolioState::new(dec!(10000));

        let buy = OrderRequest::buy("AAPL", dec!(10), dec!(100));
        let buy_fill = executor
            .execute(&buy, &mut portfolio, RiskProfile::Moderate)
            .unwrap();

        let sell = OrderRequest::sell("AAPL", dec!(10), dec!(100));
        let sell_fill = executor
            .execute(&sell, &mut portfolio, RiskProfile::Moderate)
            .unwrap();

        // Zero slippage: same price both ways, so only fees are lost
        assert_eq!(
            portfolio.cash,
            dec!(10000) - buy_fill.fees - sell_fill.fees
        );
    }

    #[test]
    fn test_weighted_average_cost_is_order_invariant() {
        let executor = zero_slippage_executor();

        // q1 @ p1 then q2 @ p2
        let mut first = PortfolioState::new(dec!(100000));
        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(10), dec!(100)),
                &mut first,
                RiskProfile::Moderate,
            )
            .unwrap();
        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(30), dec!(120)),
                &mut first,
                RiskProfile::Moderate,
            )
            .unwrap();

        // q2 @ p2 then q1 @ p1
        let mut second = PortfolioState::new(dec!(100000));
        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(30), dec!(120)),
                &mut second,
                RiskProfile::Moderate,
            )
            .unwrap();
        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(10), dec!(100)),
                &mut second,
                RiskProfile::Moderate,
            )
            .unwrap();

        // (10*100 + 30*120) / 40 = 115
        assert_eq!(first.position("AAPL").unwrap().avg_cost, dec!(115));
        assert_eq!(
            first.position("AAPL").unwrap().avg_cost,
            second.position("AAPL").unwrap().avg_cost
        );
    }

    #[test]
    fn test_sell_never_changes_avg_cost() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(10000));

        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(10), dec!(100)),
                &mut portfolio,
                RiskProfile::Moderate,
            )
            .unwrap();
        let avg_before = portfolio.position("AAPL").unwrap().avg_cost;

        executor
            .execute(
                &OrderRequest::sell("AAPL", dec!(4), dec!(150)),
                &mut portfolio,
                RiskProfile::Moderate,
            )
            .unwrap();

        let position = portfolio.position("AAPL").unwrap();
        assert_eq!(position.quantity, dec!(6));
        assert_eq!(position.avg_cost, avg_before);
    }

    #[test]
    fn test_sell_slippage_reported_as_positive_magnitude() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(10000));

        executor
            .execute(
                &OrderRequest::buy("AAPL", dec!(10), dec!(100)),
                &mut portfolio,
                RiskProfile::Moderate,
            )
            .unwrap();
        let fill = executor
            .execute(
                &OrderRequest::sell("AAPL", dec!(10), dec!(100)),
                &mut portfolio,
                RiskProfile::Moderate,
            )
            .unwrap();

        assert!(fill.slippage > Decimal::ZERO);
        assert!(fill.execution_price < dec!(100));
    }

    #[test]
    fn test_invalid_order_rejected() {
        let executor = OrderExecutor::default();
        let mut portfolio = PortfolioState::new(dec!(10000));

        let zero_qty = OrderRequest::buy("AAPL", Decimal::ZERO, dec!(100));
        assert!(matches!(
            executor.execute(&zero_qty, &mut portfolio, RiskProfile::Moderate),
            Err(OrderError::InvalidOrder(_))
        ));

        let zero_price = OrderRequest::buy("AAPL", dec!(10), Decimal::ZERO);
        assert!(matches!(
            executor.execute(&zero_price, &mut portfolio, RiskProfile::Moderate),
            Err(OrderError::InvalidOrder(_))
        ));
    }
}
