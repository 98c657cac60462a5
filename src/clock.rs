//! Clock & IDs: monotonic/wall time and trade-id generation.
//!
//! Backtests inject [`SimClock`] instead of [`SystemClock`] so replaying the
//! same request never touches wall-clock time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now_wall(&self) -> DateTime<Utc>;
    fn now_mono(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_mono(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose wall time is set by the caller and never advances on its
/// own. Used by the backtest runner so bar timestamps are deterministic.
pub struct SimClock {
    wall: Mutex<DateTime<Utc>>,
    started: Instant,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { wall: Mutex::new(start), started: Instant::now() }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut w = self.wall.lock();
        *w += duration;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.wall.lock() = at;
    }
}

impl Clock for SimClock {
    fn now_wall(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }

    fn now_mono(&self) -> Instant {
        self.started
    }
}

pub fn utc_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// 128-bit random id paired with a strictly increasing per-process sequence
/// number, used to order same-millisecond trades deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TradeId {
    pub random: u128,
    pub seq: u64,
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}-{}", self.random, self.seq)
    }
}

#[derive(Debug, Default)]
pub struct IdGenerator {
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { seq: AtomicU64::new(0) }
    }

    pub fn next_trade_id(&self) -> TradeId {
        TradeId { random: rand::random(), seq: self.seq.fetch_add(1, Ordering::SeqCst) }
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_ids_have_increasing_seq() {
        let gen = IdGenerator::new();
        let a = gen.next_trade_id();
        let b = gen.next_trade_id();
        assert!(b.seq > a.seq);
    }

    #[test]
    fn sim_clock_advances_on_command_only() {
        let start = Utc::now();
        let clock = SimClock::new(start);
        assert_eq!(clock.now_wall(), start);
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(clock.now_wall(), start + chrono::Duration::seconds(60));
    }
}
