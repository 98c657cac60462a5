//! Position Ledger: per-symbol net position, weighted-average price, and
//! PnL, each guarded by its own lock so unrelated symbols never contend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::risk::Side;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub quantity: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

// Position is keyed externally by symbol in the ledger's map; the symbol
// field below is for snapshot ergonomics (callers want it inline when
// listing across symbols).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Position {
    fn default() -> Self {
        Self { quantity: 0.0, avg_price: 0.0, realized_pnl: 0.0, unrealized_pnl: 0.0 }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Position {
    /// Apply a fill, implementing the add / reduce / flip cases. `mark`
    /// is the current mid used to recompute unrealized PnL after the
    /// update.
    pub fn apply_trade(&mut self, side: Side, quantity: f64, price: f64, mark: f64) {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let q0 = self.quantity;
        let a0 = self.avg_price;
        let q1 = q0 + signed;

        if sign(q0) == sign(signed) || q0 == 0.0 {
            // add: grows (or opens) a position in the same direction.
            self.avg_price = if q1 == 0.0 { 0.0 } else { (q0.abs() * a0 + quantity * price) / q1.abs() };
            self.quantity = q1;
        } else {
            // reduce or flip: the fill works against the existing position.
            let reduce = q0.abs().min(quantity);
            let realized_delta = (price - a0) * reduce * sign(q0);
            self.realized_pnl += realized_delta;
            if sign(q1) == sign(q0) || q1 == 0.0 {
                self.avg_price = if q1 == 0.0 { 0.0 } else { a0 };
            } else {
                // flipped through zero: the residual opens fresh at this price.
                self.avg_price = price;
            }
            self.quantity = q1;
        }

        self.unrealized_pnl = (mark - self.avg_price) * self.quantity;

        debug_assert!((self.quantity == 0.0) == (self.avg_price == 0.0));
        debug_assert!(self.avg_price >= 0.0);
    }

    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = (price - self.avg_price) * self.quantity;
    }
}

pub struct PositionLedger {
    positions: HashMap<String, Mutex<Position>>,
}

impl PositionLedger {
    pub fn new(symbols: &[String]) -> Self {
        let positions = symbols.iter().map(|s| (s.clone(), Mutex::new(Position::default()))).collect();
        Self { positions }
    }

    fn lock(&self, symbol: &str) -> Result<&Mutex<Position>, EngineError> {
        self.positions.get(symbol).ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    pub fn apply_trade(&self, symbol: &str, side: Side, quantity: f64, price: f64, mark: f64) -> Result<Position, EngineError> {
        let mut pos = self.lock(symbol)?.lock();
        pos.apply_trade(side, quantity, price, mark);
        Ok(*pos)
    }

    pub fn mark(&self, symbol: &str, price: f64) -> Result<Position, EngineError> {
        let mut pos = self.lock(symbol)?.lock();
        pos.mark(price);
        Ok(*pos)
    }

    pub fn get(&self, symbol: &str) -> Result<Position, EngineError> {
        Ok(*self.lock(symbol)?.lock())
    }

    pub fn snapshot(&self, symbol: &str, now: DateTime<Utc>) -> Result<PositionSnapshot, EngineError> {
        let p = self.get(symbol)?;
        Ok(PositionSnapshot { symbol: symbol.to_string(), quantity: p.quantity, avg_price: p.avg_price, realized_pnl: p.realized_pnl, unrealized_pnl: p.unrealized_pnl, updated_at: now })
    }

    pub fn all_snapshots(&self, now: DateTime<Utc>) -> Vec<PositionSnapshot> {
        self.positions
            .iter()
            .map(|(symbol, pos)| {
                let p = pos.lock();
                PositionSnapshot { symbol: symbol.clone(), quantity: p.quantity, avg_price: p.avg_price, realized_pnl: p.realized_pnl, unrealized_pnl: p.unrealized_pnl, updated_at: now }
            })
            .collect()
    }

    /// Restore a position from persisted state, e.g. during engine startup
    /// recovery. Bypasses the add/reduce/flip arithmetic entirely.
    pub fn restore(&self, symbol: &str, position: Position) -> Result<(), EngineError> {
        *self.lock(symbol)?.lock() = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_position_sets_avg_price_to_fill_price() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.08, 1.08);
        assert_eq!(pos.quantity, 1000.0);
        assert!((pos.avg_price - 1.08).abs() < 1e-9);
        assert_eq!(pos.realized_pnl, 0.0);
    }

    #[test]
    fn adding_to_a_position_weights_the_average_price() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.00, 1.00);
        pos.apply_trade(Side::Buy, 1000.0, 1.10, 1.10);
        assert_eq!(pos.quantity, 2000.0);
        assert!((pos.avg_price - 1.05).abs() < 1e-9);
    }

    #[test]
    fn reducing_a_position_realizes_pnl_and_keeps_avg_price() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.00, 1.00);
        pos.apply_trade(Side::Sell, 400.0, 1.10, 1.10);
        assert_eq!(pos.quantity, 600.0);
        assert!((pos.avg_price - 1.00).abs() < 1e-9);
        assert!((pos.realized_pnl - 40.0).abs() < 1e-9);
    }

    #[test]
    fn flipping_a_position_opens_the_residual_at_fill_price() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.00, 1.00);
        pos.apply_trade(Side::Sell, 1500.0, 1.20, 1.20);
        assert_eq!(pos.quantity, -500.0);
        assert!((pos.avg_price - 1.20).abs() < 1e-9);
        assert!((pos.realized_pnl - 200.0).abs() < 1e-9);
    }

    #[test]
    fn closing_fully_zeroes_avg_price() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.00, 1.00);
        pos.apply_trade(Side::Sell, 1000.0, 1.05, 1.05);
        assert_eq!(pos.quantity, 0.0);
        assert_eq!(pos.avg_price, 0.0);
        assert!((pos.realized_pnl - 50.0).abs() < 1e-9);
    }

    #[test]
    fn mark_updates_unrealized_pnl_only() {
        let mut pos = Position::default();
        pos.apply_trade(Side::Buy, 1000.0, 1.00, 1.00);
        let realized_before = pos.realized_pnl;
        pos.mark(1.05);
        assert_eq!(pos.realized_pnl, realized_before);
        assert!((pos.unrealized_pnl - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ledger_unknown_symbol_errors() {
        let ledger = PositionLedger::new(&["EURUSD".to_string()]);
        assert!(matches!(ledger.get("XXXYYY"), Err(EngineError::UnknownSymbol(_))));
    }

    #[test]
    fn ledger_symbols_update_independently() {
        let ledger = PositionLedger::new(&["EURUSD".to_string(), "GBPUSD".to_string()]);
        ledger.apply_trade("EURUSD", Side::Buy, 1000.0, 1.08, 1.08).unwrap();
        let gbp = ledger.get("GBPUSD").unwrap();
        assert_eq!(gbp.quantity, 0.0);
    }
}
