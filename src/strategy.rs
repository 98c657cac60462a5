//! Strategy layer: turns a pair of successive indicator snapshots into a
//! tri-state trading signal with a confidence score and a reason code, then
//! reduces several strategies' signals to one consensus.
//!
//! A strategy votes Buy/Sell/Hold with a confidence in `[0, 1]` and a fixed
//! reason code, since the risk gate downstream needs a crisp decision it
//! can threshold against a configured minimum confidence rather than a
//! magnitude to interpret.

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Sma,
    Rsi,
    Bollinger,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub confidence: f64,
    pub reason_code: String,
    pub source: SignalSource,
    pub inputs: IndicatorSnapshot,
}

fn hold(source: SignalSource, reason_code: &str, snapshot: IndicatorSnapshot) -> Signal {
    Signal { kind: SignalKind::Hold, confidence: 0.0, reason_code: reason_code.to_string(), source, inputs: snapshot }
}

/// Golden/death cross between the two most recent bars' SMAs. `prev` and
/// `current` must come from adjacent bars of the same price history.
pub fn sma_crossover(prev: IndicatorSnapshot, current: IndicatorSnapshot) -> Signal {
    match (prev.sma_short, prev.sma_long, current.sma_short, current.sma_long) {
        (Some(s0), Some(l0), Some(s1), Some(l1)) => {
            if s0 <= l0 && s1 > l1 {
                let confidence = (((s1 - l1) / l1) * 100.0).min(1.0).max(0.0);
                Signal { kind: SignalKind::Buy, confidence, reason_code: "golden_cross".into(), source: SignalSource::Sma, inputs: current }
            } else if s0 >= l0 && s1 < l1 {
                let confidence = (((l1 - s1) / l1) * 100.0).min(1.0).max(0.0);
                Signal { kind: SignalKind::Sell, confidence, reason_code: "death_cross".into(), source: SignalSource::Sma, inputs: current }
            } else {
                hold(SignalSource::Sma, "no_cross", current)
            }
        }
        // the long average just became available this bar: there is no
        // real "previous" relationship to compare, so the first defined
        // ordering is itself the signal.
        (_, None, Some(s1), Some(l1)) => {
            if s1 > l1 {
                let confidence = (((s1 - l1) / l1) * 100.0).min(1.0).max(0.0);
                Signal { kind: SignalKind::Buy, confidence, reason_code: "golden_cross".into(), source: SignalSource::Sma, inputs: current }
            } else if s1 < l1 {
                let confidence = (((l1 - s1) / l1) * 100.0).min(1.0).max(0.0);
                Signal { kind: SignalKind::Sell, confidence, reason_code: "death_cross".into(), source: SignalSource::Sma, inputs: current }
            } else {
                hold(SignalSource::Sma, "no_cross", current)
            }
        }
        _ => hold(SignalSource::Sma, "insufficient_history", current),
    }
}

/// Overbought/oversold threshold strategy on the latest RSI value.
pub fn rsi_strategy(snapshot: IndicatorSnapshot, oversold: f64, overbought: f64) -> Signal {
    match snapshot.rsi {
        Some(value) if value > overbought => {
            let confidence = ((value - overbought) / (100.0 - overbought)).min(1.0).max(0.0);
            Signal { kind: SignalKind::Sell, confidence, reason_code: "overbought".into(), source: SignalSource::Rsi, inputs: snapshot }
        }
        Some(value) if value < oversold => {
            let confidence = ((oversold - value) / oversold).min(1.0).max(0.0);
            Signal { kind: SignalKind::Buy, confidence, reason_code: "oversold".into(), source: SignalSource::Rsi, inputs: snapshot }
        }
        Some(_) => hold(SignalSource::Rsi, "rsi_neutral", snapshot),
        None => hold(SignalSource::Rsi, "insufficient_history", snapshot),
    }
}

/// Mean-reversion strategy off the Bollinger bands, evaluated against the
/// latest mid price (not part of the snapshot itself).
pub fn bollinger_strategy(snapshot: IndicatorSnapshot, price: f64) -> Signal {
    match snapshot.bollinger {
        Some(bands) if price > bands.upper => {
            let denom = (bands.upper - bands.middle).max(f64::EPSILON);
            let confidence = ((price - bands.upper) / denom).min(1.0).max(0.0);
            Signal { kind: SignalKind::Sell, confidence, reason_code: "above_upper_band".into(), source: SignalSource::Bollinger, inputs: snapshot }
        }
        Some(bands) if price < bands.lower => {
            let denom = (bands.middle - bands.lower).max(f64::EPSILON);
            let confidence = ((bands.lower - price) / denom).min(1.0).max(0.0);
            Signal { kind: SignalKind::Buy, confidence, reason_code: "below_lower_band".into(), source: SignalSource::Bollinger, inputs: snapshot }
        }
        Some(_) => hold(SignalSource::Bollinger, "within_bands", snapshot),
        None => hold(SignalSource::Bollinger, "insufficient_history", snapshot),
    }
}

/// Count BUYs vs SELLs among signals with positive confidence; the majority
/// side wins with the mean confidence of its side, capped at 1. Ties or an
/// all-HOLD set produce HOLD with confidence 0.
pub fn consensus(signals: &[Signal], snapshot: IndicatorSnapshot) -> Signal {
    let buys: Vec<f64> = signals.iter().filter(|s| s.kind == SignalKind::Buy && s.confidence > 0.0).map(|s| s.confidence).collect();
    let sells: Vec<f64> = signals.iter().filter(|s| s.kind == SignalKind::Sell && s.confidence > 0.0).map(|s| s.confidence).collect();

    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;

    let result = if buys.len() > sells.len() {
        Signal { kind: SignalKind::Buy, confidence: mean(&buys).min(1.0), reason_code: "combined_analysis".into(), source: SignalSource::Combined, inputs: snapshot }
    } else if sells.len() > buys.len() {
        Signal { kind: SignalKind::Sell, confidence: mean(&sells).min(1.0), reason_code: "combined_analysis".into(), source: SignalSource::Combined, inputs: snapshot }
    } else {
        Signal { kind: SignalKind::Hold, confidence: 0.0, reason_code: "combined_analysis".into(), source: SignalSource::Combined, inputs: snapshot }
    };
    result
}
