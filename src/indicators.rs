//! Indicator Engine: pure functions over explicit price-history slices.
//!
//! Every function takes the slice of history it needs and recomputes from
//! scratch rather than keeping running state, so a caller can feed it any
//! sub-window (a backtest replaying only bars up to `t`, say) and get the
//! exact same answer a live evaluation would have produced at that point —
//! no lookahead, no hidden state to get out of sync.

use serde::{Deserialize, Serialize};

/// Simple moving average of the last `period` values in `prices`. `None` if
/// there isn't enough history yet.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Wilder-smoothed RSI over `period` price changes (so `period + 1` prices
/// are required). A zero average loss yields RSI 100 rather than dividing
/// by zero.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - (period + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger bands over the last `period` prices using population (not
/// sample) standard deviation.
pub fn bollinger(prices: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();
    Some(BollingerBands { middle: mean, upper: mean + num_std * std_dev, lower: mean - num_std * std_dev })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub rsi: Option<f64>,
    pub bollinger: Option<BollingerBands>,
}

/// Compute every configured indicator over one price-history slice in a
/// single pass, so the strategy layer always evaluates a consistent view of
/// "as of this tick".
pub fn compute_snapshot(
    prices: &[f64],
    sma_short_period: usize,
    sma_long_period: usize,
    rsi_period: usize,
    bb_period: usize,
    bb_std: f64,
) -> IndicatorSnapshot {
    IndicatorSnapshot {
        sma_short: sma(prices, sma_short_period),
        sma_long: sma(prices, sma_long_period),
        rsi: rsi(prices, rsi_period),
        bollinger: bollinger(prices, bb_period, bb_std),
    }
}
