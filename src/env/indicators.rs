//! Technical indicators feeding the observation vector.
//!
//! Each indicator is a standalone strategy object so an environment can be
//! assembled with a custom set; [`IndicatorSet::standard`] mirrors the five
//! signals the observation layout expects.

/// A single technical signal computed over a close-price history.
///
/// `compute` receives closes oldest-first and must return `neutral()` when
/// the history is too short for the formula.
pub trait Indicator: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(&self, closes: &[f64]) -> f64;

    /// Value emitted when there is not enough history to compute
    fn neutral(&self) -> f64;
}

/// Simple-moving-average ratio: `mean(last period)/last_close - 1`
#[derive(Debug, Clone, Copy)]
pub struct SmaRatio {
    pub period: usize,
}

impl SmaRatio {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl Indicator for SmaRatio {
    fn name(&self) -> &'static str {
        "sma_ratio"
    }

    fn compute(&self, closes: &[f64]) -> f64 {
        if self.period == 0 || closes.len() < self.period {
            return self.neutral();
        }
        let window = &closes[closes.len() - self.period..];
        let mean = window.iter().sum::<f64>() / self.period as f64;
        let last = closes[closes.len() - 1];
        if last > 0.0 {
            mean / last - 1.0
        } else {
            self.neutral()
        }
    }

    fn neutral(&self) -> f64 {
        0.0
    }
}

/// Wilder relative strength index in `[0, 100]`
#[derive(Debug, Clone, Copy)]
pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn compute(&self, closes: &[f64]) -> f64 {
        if self.period == 0 || closes.len() < self.period + 1 {
            return self.neutral();
        }

        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for pair in closes[..self.period + 1].windows(2) {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                avg_gain += delta;
            } else {
                avg_loss += -delta;
            }
        }
        avg_gain /= self.period as f64;
        avg_loss /= self.period as f64;

        // Wilder smoothing over the remaining deltas
        for pair in closes[self.period..].windows(2) {
            let delta = pair[1] - pair[0];
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            avg_gain = (avg_gain * (self.period as f64 - 1.0) + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period as f64 - 1.0) + loss) / self.period as f64;
        }

        if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                // Flat series carries no momentum signal
                return self.neutral();
            }
            return 100.0;
        }

        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    fn neutral(&self) -> f64 {
        50.0
    }
}

/// MACD line (fast EMA minus slow EMA) normalized by the last close
#[derive(Debug, Clone, Copy)]
pub struct MacdSignal {
    pub fast: usize,
    pub slow: usize,
}

impl MacdSignal {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

fn ema(closes: &[f64], period: usize) -> f64 {
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = closes[0];
    for close in &closes[1..] {
        value = close * k + value * (1.0 - k);
    }
    value
}

impl Indicator for MacdSignal {
    fn name(&self) -> &'static str {
        "macd_signal"
    }

    fn compute(&self, closes: &[f64]) -> f64 {
        if closes.is_empty() || closes.len() < self.slow.max(self.fast) {
            return self.neutral();
        }
        let last = closes[closes.len() - 1];
        if last <= 0.0 {
            return self.neutral();
        }
        (ema(closes, self.fast) - ema(closes, self.slow)) / last
    }

    fn neutral(&self) -> f64 {
        0.0
    }
}

/// Position inside the Bollinger band, clamped to `[0, 1]`
#[derive(Debug, Clone, Copy)]
pub struct BollingerPosition {
    pub period: usize,
    pub width: f64,
}

impl BollingerPosition {
    pub fn new(period: usize, width: f64) -> Self {
        Self { period, width }
    }
}

impl Indicator for BollingerPosition {
    fn name(&self) -> &'static str {
        "bb_position"
    }

    fn compute(&self, closes: &[f64]) -> f64 {
        if self.period == 0 || closes.len() < self.period {
            return self.neutral();
        }
        let window = &closes[closes.len() - self.period..];
        let mean = window.iter().sum::<f64>() / self.period as f64;
        let var =
            window.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / self.period as f64;
        let std = var.sqrt();
        if std == 0.0 {
            return self.neutral();
        }

        let lower = mean - self.width * std;
        let upper = mean + self.width * std;
        let last = closes[closes.len() - 1];
        ((last - lower) / (upper - lower)).clamp(0.0, 1.0)
    }

    fn neutral(&self) -> f64 {
        0.5
    }
}

/// Ordered indicator pipeline with a shared minimum-history gate
pub struct IndicatorSet {
    indicators: Vec<Box<dyn Indicator>>,
    min_samples: usize,
}

impl IndicatorSet {
    pub fn new(indicators: Vec<Box<dyn Indicator>>, min_samples: usize) -> Self {
        Self {
            indicators,
            min_samples,
        }
    }

    /// The standard five-signal set: SMA-20 ratio, SMA-50 ratio, RSI-14,
    /// MACD 12/26, Bollinger 20/2
    pub fn standard() -> Self {
        Self::new(
            vec![
                Box::new(SmaRatio::new(20)),
                Box::new(SmaRatio::new(50)),
                Box::new(Rsi::new(14)),
                Box::new(MacdSignal::new(12, 26)),
                Box::new(BollingerPosition::new(20, 2.0)),
            ],
            20,
        )
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.indicators.iter().map(|i| i.name()).collect()
    }

    /// Compute every indicator in registry order. Below the sample gate all
    /// slots emit their neutral value.
    pub fn compute_all(&self, closes: &[f64]) -> Vec<f64> {
        if closes.len() < self.min_samples {
            return self.indicators.iter().map(|i| i.neutral()).collect();
        }
        self.indicators.iter().map(|i| i.compute(closes)).collect()
    }
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for IndicatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorSet")
            .field("indicators", &self.names())
            .field("min_samples", &self.min_samples)
            .finish()
    }
}
