//! Backtest Runner: replays a deterministic synthetic price path through a
//! throwaway indicator+strategy+equity stack, entirely isolated from the
//! live tick bus, engine, and persistence.
//!
//! Bars come from the same random-walk formula the live feed uses, seeded
//! from a stable hash of the request so identical requests always reproduce
//! identical bars. Fills happen at the same bar's close with no latency or
//! slippage model: this is a strategy-quality sandbox, not an
//! execution-cost study.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::indicators::compute_snapshot;
use crate::registry::SymbolRegistry;
use crate::strategy::{bollinger_strategy, consensus, rsi_strategy, sma_crossover, SignalKind};

#[derive(Debug, Clone)]
pub struct BacktestParameters {
    pub sma_short: usize,
    pub sma_long: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub bb_period: usize,
    pub bb_std: f64,
    pub volatility_sigma: f64,
    pub min_confidence: f64,
}

impl Default for BacktestParameters {
    fn default() -> Self {
        Self { sma_short: 10, sma_long: 50, rsi_period: 14, rsi_overbought: 70.0, rsi_oversold: 30.0, bb_period: 20, bb_std: 2.0, volatility_sigma: 0.001, min_confidence: 0.6 }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval_seconds: i64,
    pub initial_capital: f64,
    pub parameters: BacktestParameters,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BacktestReport {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub final_equity: f64,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Derive a deterministic seed from the request's fields via a stable
/// FNV-1a hash, so identical inputs always produce identical bars.
fn seed_for(req: &BacktestRequest) -> u64 {
    let key = format!("{}|{}|{}|{}|{:.6}", req.symbol, req.start.timestamp(), req.end.timestamp(), req.interval_seconds, req.initial_capital);
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct Bar {
    close: f64,
}

fn generate_bars(req: &BacktestRequest, base_price: f64, rng: &mut StdRng) -> Vec<Bar> {
    let span = (req.end - req.start).num_seconds().max(0);
    let count = if req.interval_seconds > 0 { (span / req.interval_seconds).max(1) } else { 1 };
    let mut bars = Vec::with_capacity(count as usize);
    let mut price = base_price;
    for _ in 0..count {
        let shock: f64 = rng.gen_range(-1.0..1.0) * req.parameters.volatility_sigma;
        price *= 1.0 + shock;
        if price <= 0.0 {
            price = base_price * 0.01;
        }
        bars.push(Bar { close: price });
    }
    bars
}

/// Run the synthetic backtest described in `req`. `registry` is only
/// consulted for the symbol's starting price; no other component of the
/// live system is touched.
pub fn run_backtest(req: &BacktestRequest, registry: &SymbolRegistry) -> Result<BacktestReport, crate::error::EngineError> {
    let spec = registry.lookup(&req.symbol)?;
    let mut rng = StdRng::seed_from_u64(seed_for(req));
    let bars = generate_bars(req, spec.base_price, &mut rng);

    let params = &req.parameters;
    let mut history: Vec<f64> = Vec::new();
    let mut cash = req.initial_capital;
    let mut position_qty = 0.0_f64;
    let mut position_entry_price = 0.0_f64;
    let mut total_trades = 0u32;
    let mut winning_trades = 0u32;
    let mut total_pnl = 0.0_f64;
    let mut equity_curve: Vec<f64> = Vec::with_capacity(bars.len());

    for bar in &bars {
        history.push(bar.close);

        if history.len() >= 30 {
            let current = compute_snapshot(&history, params.sma_short, params.sma_long, params.rsi_period, params.bb_period, params.bb_std);
            let prev = compute_snapshot(&history[..history.len() - 1], params.sma_short, params.sma_long, params.rsi_period, params.bb_period, params.bb_std);
            let sma_signal = sma_crossover(prev, current);
            let rsi_signal = rsi_strategy(current, params.rsi_oversold, params.rsi_overbought);
            let bb_signal = bollinger_strategy(current, bar.close);
            let combined = consensus(&[sma_signal, rsi_signal, bb_signal], current);

            if combined.confidence >= params.min_confidence {
                match combined.kind {
                    SignalKind::Buy if position_qty == 0.0 => {
                        let notional = cash * 0.10;
                        let qty = (notional / bar.close).floor();
                        if qty > 0.0 {
                            cash -= qty * bar.close;
                            position_qty = qty;
                            position_entry_price = bar.close;
                            total_trades += 1;
                        }
                    }
                    SignalKind::Sell if position_qty > 0.0 => {
                        let proceeds = position_qty * bar.close;
                        let pnl = (bar.close - position_entry_price) * position_qty;
                        cash += proceeds;
                        total_pnl += pnl;
                        if pnl > 0.0 {
                            winning_trades += 1;
                        }
                        total_trades += 1;
                        position_qty = 0.0;
                        position_entry_price = 0.0;
                    }
                    _ => {}
                }
            }
        }

        equity_curve.push(cash + position_qty * bar.close);
    }

    // any residual open position is marked to the final close and its
    // unrealized pnl folded into the total before computing final equity.
    let final_close = bars.last().map(|b| b.close).unwrap_or(0.0);
    if position_qty > 0.0 {
        let residual_pnl = (final_close - position_entry_price) * position_qty;
        total_pnl += residual_pnl;
        cash += position_qty * final_close;
        position_qty = 0.0;
    }
    let final_equity = cash;

    let mut peak = req.initial_capital;
    let mut max_drawdown_pct = 0.0_f64;
    for equity in &equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        if peak > 0.0 {
            let drawdown = (peak - equity) / peak * 100.0;
            if drawdown > max_drawdown_pct {
                max_drawdown_pct = drawdown;
            }
        }
    }

    let win_rate = if total_trades == 0 { 0.0 } else { winning_trades as f64 / total_trades as f64 };
    let return_pct = if req.initial_capital > 0.0 { (final_equity - req.initial_capital) / req.initial_capital * 100.0 } else { 0.0 };

    Ok(BacktestReport { total_trades, winning_trades, win_rate, total_pnl, final_equity, return_pct, max_drawdown_pct })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_request() -> BacktestRequest {
        let start = Utc::now();
        BacktestRequest {
            symbol: "EURUSD".into(),
            start,
            end: start + Duration::seconds(3600),
            interval_seconds: 10,
            initial_capital: 100_000.0,
            parameters: BacktestParameters::default(),
        }
    }

    #[test]
    fn identical_inputs_produce_identical_reports() {
        let registry = SymbolRegistry::default_fx();
        let req = sample_request();
        let a = run_backtest(&req, &registry).unwrap();
        let b = run_backtest(&req, &registry).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_symbols_diverge() {
        let registry = SymbolRegistry::default_fx();
        let mut req_a = sample_request();
        req_a.symbol = "EURUSD".into();
        let mut req_b = sample_request();
        req_b.symbol = "GBPUSD".into();
        let a = run_backtest(&req_a, &registry).unwrap();
        let b = run_backtest(&req_b, &registry).unwrap();
        assert_ne!(a.final_equity, b.final_equity);
    }

    #[test]
    fn unknown_symbol_errors() {
        let registry = SymbolRegistry::default_fx();
        let mut req = sample_request();
        req.symbol = "XXXYYY".into();
        assert!(run_backtest(&req, &registry).is_err());
    }

    #[test]
    fn win_rate_is_zero_with_no_trades_not_nan() {
        let registry = SymbolRegistry::default_fx();
        let mut req = sample_request();
        req.end = req.start + Duration::seconds(20);
        let report = run_backtest(&req, &registry).unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.win_rate, 0.0);
    }

    #[test]
    fn drawdown_never_negative() {
        let registry = SymbolRegistry::default_fx();
        let req = sample_request();
        let report = run_backtest(&req, &registry).unwrap();
        assert!(report.max_drawdown_pct >= 0.0);
    }
}
