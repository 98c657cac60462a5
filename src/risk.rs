//! Risk Gate: sizes a proposed trade and runs it through an ordered
//! sequence of checks, each returning the first violation it finds:
//! daily notional cap, per-trade cap, per-symbol exposure cap, and a
//! minimum-notional floor on sizing itself.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::ledger::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy)]
pub struct TradeProposal {
    pub side: Side,
    pub confidence: f64,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
}

fn round_to_lot(quantity: f64, lot_step: f64) -> f64 {
    if lot_step <= 0.0 {
        return quantity;
    }
    (quantity / lot_step).ceil() * lot_step
}

/// `max(MIN_NOTIONAL/mid, base_position * confidence)`, rounded up to the
/// lot step, then bumped further if the resulting notional still falls
/// short of `MIN_NOTIONAL` (can happen after rounding down on a coarse lot
/// step — rounding here always rounds up, so this is a defensive floor).
pub fn size_proposal(proposal: &TradeProposal, base_position_notional: f64, min_notional: f64, lot_step: f64) -> Sizing {
    let price = match proposal.side {
        Side::Buy => proposal.ask,
        Side::Sell => proposal.bid,
    };
    let mid = (proposal.bid + proposal.ask) / 2.0;
    let raw_quantity = (min_notional / mid).max(base_position_notional * proposal.confidence / mid);
    let mut quantity = round_to_lot(raw_quantity, lot_step);
    let mut notional = quantity * price;
    if notional < min_notional {
        quantity = round_to_lot((min_notional / price).ceil(), lot_step);
        notional = quantity * price;
    }
    Sizing { quantity, price, notional }
}

#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub daily_cap_notional: f64,
    pub min_notional: f64,
    pub per_trade_cap_fraction: f64,
    pub per_symbol_cap_fraction: f64,
}

impl RiskLimits {
    pub fn per_trade_cap(&self) -> f64 {
        self.daily_cap_notional * self.per_trade_cap_fraction
    }

    pub fn per_symbol_cap(&self) -> f64 {
        self.daily_cap_notional * self.per_symbol_cap_fraction
    }
}

/// Run the ordered checks against an already-sized proposal. Returns the
/// first violated check as an error; `Ok` means the trade may execute.
/// `engine_running` and `daily_notional` are read, not mutated, here — a
/// `DailyVolumeExceeded` rejection is the caller's cue to halt the engine,
/// since this gate has no authority over engine state.
pub fn gate(
    sizing: &Sizing,
    engine_running: bool,
    daily_notional: f64,
    position: &Position,
    symbol: &str,
    limits: &RiskLimits,
) -> Result<(), EngineError> {
    if !engine_running {
        return Err(EngineError::EngineHalted { reason: "not running".into() });
    }

    let prospective_daily = daily_notional + sizing.notional;
    if prospective_daily > limits.daily_cap_notional {
        return Err(EngineError::DailyVolumeExceeded { requested: prospective_daily, cap: limits.daily_cap_notional });
    }

    let per_trade_cap = limits.per_trade_cap();
    if sizing.notional > per_trade_cap {
        return Err(EngineError::TradeTooLarge { notional: sizing.notional, cap: per_trade_cap });
    }

    let existing_exposure = (position.quantity * position.avg_price).abs();
    let prospective_exposure = existing_exposure + sizing.notional;
    let per_symbol_cap = limits.per_symbol_cap();
    if prospective_exposure > per_symbol_cap {
        return Err(EngineError::SymbolExposureExceeded { symbol: symbol.to_string(), exposure: prospective_exposure, cap: per_symbol_cap });
    }

    Ok(())
}

/// Size then gate a proposal in one call, the shape the engine's execution
/// path actually uses.
pub fn size_and_gate(
    proposal: &TradeProposal,
    engine_running: bool,
    daily_notional: f64,
    position: &Position,
    symbol: &str,
    limits: &RiskLimits,
    base_position_notional: f64,
    lot_step: f64,
) -> Result<Sizing, EngineError> {
    let sizing = size_proposal(proposal, base_position_notional, limits.min_notional, lot_step);
    gate(&sizing, engine_running, daily_notional, position, symbol, limits)?;
    Ok(sizing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimits {
        RiskLimits { daily_cap_notional: 10_000_000.0, min_notional: 1_000.0, per_trade_cap_fraction: 0.10, per_symbol_cap_fraction: 0.20 }
    }

    fn flat_position() -> Position {
        Position { quantity: 0.0, avg_price: 0.0, realized_pnl: 0.0, unrealized_pnl: 0.0 }
    }

    fn proposal(confidence: f64) -> TradeProposal {
        TradeProposal { side: Side::Buy, confidence, bid: 1.0799, ask: 1.0801 }
    }

    #[test]
    fn sizing_never_falls_below_min_notional() {
        let sizing = size_proposal(&proposal(0.01), 10_000.0, 1_000.0, 1.0);
        assert!(sizing.notional >= 1_000.0 - 1e-6);
    }

    #[test]
    fn sizing_scales_with_confidence_above_the_floor() {
        let low = size_proposal(&proposal(0.5), 10_000.0, 1_000.0, 1.0);
        let high = size_proposal(&proposal(1.0), 10_000.0, 1_000.0, 1.0);
        assert!(high.notional >= low.notional);
    }

    #[test]
    fn halted_engine_rejects_before_any_other_check() {
        let sizing = Sizing { quantity: 100.0, price: 1.08, notional: 108.0 };
        let result = gate(&sizing, false, 0.0, &flat_position(), "EURUSD", &limits());
        assert!(matches!(result, Err(EngineError::EngineHalted { .. })));
    }

    #[test]
    fn daily_cap_breach_rejected() {
        let sizing = Sizing { quantity: 1.0, price: 1.0, notional: 1_000_000.0 };
        let result = gate(&sizing, true, 9_500_000.0, &flat_position(), "EURUSD", &limits());
        assert!(matches!(result, Err(EngineError::DailyVolumeExceeded { .. })));
    }

    #[test]
    fn per_trade_cap_breach_rejected() {
        let sizing = Sizing { quantity: 1.0, price: 1.0, notional: 2_000_000.0 };
        let result = gate(&sizing, true, 0.0, &flat_position(), "EURUSD", &limits());
        assert!(matches!(result, Err(EngineError::TradeTooLarge { .. })));
    }

    #[test]
    fn symbol_exposure_breach_rejected() {
        let sizing = Sizing { quantity: 1.0, price: 1.0, notional: 500_000.0 };
        let position = Position { quantity: 2_000_000.0, avg_price: 1.0, realized_pnl: 0.0, unrealized_pnl: 0.0 };
        let result = gate(&sizing, true, 0.0, &position, "EURUSD", &limits());
        assert!(matches!(result, Err(EngineError::SymbolExposureExceeded { .. })));
    }

    #[test]
    fn well_formed_trade_passes_every_check() {
        let sizing = size_proposal(&proposal(0.8), 10_000.0, 1_000.0, 1.0);
        let result = gate(&sizing, true, 0.0, &flat_position(), "EURUSD", &limits());
        assert!(result.is_ok());
    }

    #[test]
    fn check_order_is_daily_cap_before_per_trade_cap() {
        // a trade that breaches both should report the daily cap, since
        // that check runs first.
        let sizing = Sizing { quantity: 1.0, price: 1.0, notional: 5_000_000.0 };
        let result = gate(&sizing, true, 9_000_000.0, &flat_position(), "EURUSD", &limits());
        assert!(matches!(result, Err(EngineError::DailyVolumeExceeded { .. })));
    }
}
