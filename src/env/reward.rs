//! Reward shaping for the trading environment.
//!
//! The default signal rewards NAV growth, charges for transaction costs and
//! volatility, and penalizes drawdowns from the running peak. Alternative
//! shapings plug in through [`RewardFunction`].

use crate::sim::RiskProfile;

/// Computes the scalar step reward from a completed transition
pub trait RewardFunction: Send + Sync {
    fn compute(&self, ctx: &RewardContext<'_>) -> f64;
}

/// Inputs to one reward evaluation
#[derive(Debug, Clone)]
pub struct RewardContext<'a> {
    pub prev_nav: f64,
    pub current_nav: f64,
    /// Fees paid during this step
    pub fees: f64,
    pub risk_profile: RiskProfile,
    /// Recent period returns, oldest first
    pub trailing_returns: &'a [f64],
    /// Highest NAV seen so far this episode
    pub peak_nav: f64,
}

/// NAV-change reward with cost, volatility, and drawdown penalties
#[derive(Debug, Clone, Copy)]
pub struct RiskAdjustedReward {
    pub nav_scale: f64,
    pub cost_scale: f64,
    pub drawdown_scale: f64,
    pub clip: f64,
}

impl Default for RiskAdjustedReward {
    fn default() -> Self {
        Self {
            nav_scale: 100.0,
            cost_scale: 10.0,
            drawdown_scale: 5.0,
            clip: 10.0,
        }
    }
}

impl RiskAdjustedReward {
    /// Volatility penalty strength per risk tier
    fn volatility_weight(profile: RiskProfile) -> f64 {
        match profile {
            RiskProfile::Conservative => 2.0,
            RiskProfile::Moderate => 1.0,
            RiskProfile::Aggressive => 0.5,
        }
    }
}

impl RewardFunction for RiskAdjustedReward {
    fn compute(&self, ctx: &RewardContext<'_>) -> f64 {
        let nav_term = if ctx.prev_nav > 0.0 {
            (ctx.current_nav - ctx.prev_nav) / ctx.prev_nav * self.nav_scale
        } else {
            0.0
        };

        let cost_term = if ctx.current_nav > 0.0 {
            -(ctx.fees / ctx.current_nav) * self.cost_scale
        } else {
            0.0
        };

        let volatility_term = if ctx.trailing_returns.len() > 1 {
            -std_dev(ctx.trailing_returns) * Self::volatility_weight(ctx.risk_profile)
        } else {
            0.0
        };

        let drawdown_term = if ctx.peak_nav > 0.0 && ctx.current_nav < ctx.peak_nav {
            -(ctx.peak_nav - ctx.current_nav) / ctx.peak_nav * self.drawdown_scale
        } else {
            0.0
        };

        (nav_term + cost_term + volatility_term + drawdown_term).clamp(-self.clip, self.clip)
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Sharpe ratio over period returns; 0 when the series is flat or too short
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std = std_dev(returns);
    if std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate) / std
}

/// Worst peak-to-trough loss over a NAV series, as a fraction in `[0, 1]`
pub fn max_drawdown(nav_history: &[f64]) -> f64 {
    if nav_history.len() < 2 {
        return 0.0;
    }
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0;
    for &nav in nav_history {
        peak = peak.max(nav);
        if peak > 0.0 {
            let drawdown = (peak - nav) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(prev: f64, current: f64) -> RewardContext<'static> {
        RewardContext {
            prev_nav: prev,
            current_nav: current,
            fees: 0.0,
            risk_profile: RiskProfile::Moderate,
            trailing_returns: &[],
            peak_nav: current,
        }
    }

    #[test]
    fn nav_growth_scales_to_percent() {
        let reward = RiskAdjustedReward::default().compute(&ctx(10_000.0, 10_100.0));
        assert!((reward - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fees_reduce_the_reward() {
        let clean = RiskAdjustedReward::default().compute(&ctx(10_000.0, 10_100.0));
        let mut taxed = ctx(10_000.0, 10_100.0);
        taxed.fees = 50.0;
        let with_fees = RiskAdjustedReward::default().compute(&taxed);
        assert!(with_fees < clean);
        assert!((clean - with_fees - 50.0 / 10_100.0 * 10.0).abs() < 1e-9);
    }

    #[test]
    fn conservative_profile_pays_more_for_volatility() {
        let returns = [0.05, -0.04, 0.03, -0.06];
        let mut conservative = ctx(10_000.0, 10_000.0);
        conservative.risk_profile = RiskProfile::Conservative;
        conservative.trailing_returns = &returns;
        let mut aggressive = conservative.clone();
        aggressive.risk_profile = RiskProfile::Aggressive;

        let f = RiskAdjustedReward::default();
        assert!(f.compute(&conservative) < f.compute(&aggressive));
    }

    #[test]
    fn drawdown_from_the_peak_is_penalized() {
        let mut underwater = ctx(10_000.0, 9_500.0);
        underwater.peak_nav = 10_000.0;
        let at_peak = ctx(10_000.0, 9_500.0);

        let f = RiskAdjustedReward::default();
        assert!(f.compute(&underwater) < f.compute(&at_peak));
    }

    #[test]
    fn reward_is_clipped_both_ways() {
        let f = RiskAdjustedReward::default();
        assert_eq!(f.compute(&ctx(100.0, 10_000.0)), 10.0);
        assert_eq!(f.compute(&ctx(10_000.0, 100.0)), -10.0);
    }

    #[test]
    fn zero_prev_nav_yields_no_nav_term() {
        let reward = RiskAdjustedReward::default().compute(&ctx(0.0, 10_000.0));
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn sharpe_ratio_handles_degenerate_series() {
        assert_eq!(sharpe_ratio(&[], 0.0), 0.0);
        assert_eq!(sharpe_ratio(&[0.01], 0.0), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
        assert!(sharpe_ratio(&[0.02, 0.01, 0.03], 0.0) > 0.0);
    }

    #[test]
    fn max_drawdown_finds_the_worst_trough() {
        let navs = [100.0, 120.0, 90.0, 110.0];
        assert!((max_drawdown(&navs) - 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0]), 0.0);
    }
}
