//! Tick Bus: validates and fans out ticks, owns each symbol's bounded
//! history ring, and carries trade events to subscribers.
//!
//! The bus is the sole writer of a symbol's history; callers only ever see
//! immutable snapshots. Tick subscribers get a coalesce-latest feed (backed
//! by `tokio::sync::watch`, which already drops intermediate values for a
//! slow reader); trade-event subscribers get a bounded drop-oldest queue
//! with an observable counter, since a trade event must not be silently
//! replaced by a newer one the way a tick can.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::EngineError;
use crate::logging::{self, Metrics};
use crate::registry::SymbolRegistry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    pub symbol_seq: u64,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread: f64,
    pub volume: f64,
    pub event_time: DateTime<Utc>,
}

/// Caller-supplied fields before the bus assigns `symbol_seq` and derives
/// `mid`/`spread`.
#[derive(Debug, Clone, Copy)]
pub struct TickInput {
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    pub event_time: DateTime<Utc>,
    pub mid: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub status: String,
    pub event_time: DateTime<Utc>,
}

/// Bounded FIFO queue that drops the oldest entry (and counts the drop)
/// rather than rejecting the newest one — the back-pressure policy for
/// trade events.
pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1), dropped: AtomicU64::new(0) }
    }

    /// Returns whether an older entry was evicted to make room.
    pub fn push(&self, item: T) -> bool {
        let mut guard = self.inner.lock();
        let dropped = guard.len() >= self.capacity;
        if dropped {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(item);
        dropped
    }

    /// Remove and return everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().drain(..).collect()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type TradeSubscription = Arc<DropOldestQueue<TradeEvent>>;

struct SymbolBus {
    capacity: usize,
    history: VecDeque<HistoryPoint>,
    latest: Option<Tick>,
    seq: u64,
    tick_tx: watch::Sender<Option<Tick>>,
    trade_subs: Vec<TradeSubscription>,
}

impl SymbolBus {
    fn new(capacity: usize) -> Self {
        let (tick_tx, _rx) = watch::channel(None);
        Self { capacity, history: VecDeque::with_capacity(capacity), latest: None, seq: 0, tick_tx, trade_subs: Vec::new() }
    }
}

pub struct TickBus {
    symbols: HashMap<String, Mutex<SymbolBus>>,
    pub metrics: Arc<Metrics>,
}

impl TickBus {
    pub fn new(registry: &SymbolRegistry, history_capacity: usize, metrics: Arc<Metrics>) -> Self {
        let symbols = registry
            .symbols()
            .map(|s| (s.clone(), Mutex::new(SymbolBus::new(history_capacity))))
            .collect();
        Self { symbols, metrics }
    }

    fn lock_symbol(&self, symbol: &str) -> Result<&Mutex<SymbolBus>, EngineError> {
        self.symbols.get(symbol).ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    /// Validate, assign sequence, evict-and-append to the history ring, and
    /// fan out to subscribers.
    pub fn publish(&self, symbol: &str, input: TickInput) -> Result<Tick, EngineError> {
        let lock = self.lock_symbol(symbol)?;
        if input.bid <= 0.0 {
            self.metrics.bad_ticks.fetch_add(1, Ordering::Relaxed);
            logging::log_bad_tick(symbol, "bid must be > 0");
            return Err(EngineError::BadTick { symbol: symbol.to_string(), reason: "bid must be > 0".into() });
        }
        if input.ask < input.bid {
            self.metrics.bad_ticks.fetch_add(1, Ordering::Relaxed);
            logging::log_bad_tick(symbol, "ask must be >= bid");
            return Err(EngineError::BadTick { symbol: symbol.to_string(), reason: "ask must be >= bid".into() });
        }
        let spread = input.ask - input.bid;
        if spread <= 0.0 {
            self.metrics.bad_ticks.fetch_add(1, Ordering::Relaxed);
            logging::log_bad_tick(symbol, "spread must be > 0");
            return Err(EngineError::BadTick { symbol: symbol.to_string(), reason: "spread must be > 0".into() });
        }

        let mut bus = lock.lock();
        bus.seq += 1;
        let mid = (input.bid + input.ask) / 2.0;
        let tick = Tick { symbol_seq: bus.seq, bid: input.bid, ask: input.ask, mid, spread, volume: input.volume, event_time: input.event_time };

        let point = HistoryPoint { event_time: tick.event_time, mid, high: input.ask, low: input.bid, volume: tick.volume, seq: tick.symbol_seq };
        if bus.history.len() >= bus.capacity {
            bus.history.pop_front();
        }
        bus.history.push_back(point);
        bus.latest = Some(tick);

        let _ = bus.tick_tx.send(Some(tick));
        Ok(tick)
    }

    pub fn subscribe_ticks(&self, symbol: &str) -> Result<watch::Receiver<Option<Tick>>, EngineError> {
        let bus = self.lock_symbol(symbol)?.lock();
        Ok(bus.tick_tx.subscribe())
    }

    pub fn subscribe_trades(&self, symbol: &str, capacity: usize) -> Result<TradeSubscription, EngineError> {
        let mut bus = self.lock_symbol(symbol)?.lock();
        let sub = Arc::new(DropOldestQueue::new(capacity));
        bus.trade_subs.push(sub.clone());
        Ok(sub)
    }

    pub fn publish_trade(&self, symbol: &str, event: TradeEvent) -> Result<(), EngineError> {
        let bus = self.lock_symbol(symbol)?.lock();
        let mut dropped = 0u64;
        for sub in &bus.trade_subs {
            if sub.push(event.clone()) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.metrics.trade_events_dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn snapshot(&self, symbol: &str, n: usize) -> Result<Vec<HistoryPoint>, EngineError> {
        let bus = self.lock_symbol(symbol)?.lock();
        let len = bus.history.len();
        let start = len.saturating_sub(n);
        Ok(bus.history.iter().skip(start).copied().collect())
    }

    pub fn latest(&self, symbol: &str) -> Result<Option<Tick>, EngineError> {
        Ok(self.lock_symbol(symbol)?.lock().latest)
    }

    pub fn history_len(&self, symbol: &str) -> Result<usize, EngineError> {
        Ok(self.lock_symbol(symbol)?.lock().history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(bid: f64, ask: f64) -> TickInput {
        TickInput { bid, ask, volume: 100_000.0, event_time: Utc::now() }
    }

    fn bus(capacity: usize) -> TickBus {
        TickBus::new(&SymbolRegistry::default_fx(), capacity, Arc::new(Metrics::default()))
    }

    #[test]
    fn publish_rejects_bad_tick() {
        let b = bus(10);
        assert!(b.publish("EURUSD", input(1.08, 1.079)).is_err());
        assert!(b.publish("EURUSD", input(0.0, 1.08)).is_err());
        assert_eq!(b.metrics.bad_ticks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn history_bound_keeps_exactly_h_newest() {
        let b = bus(5);
        for i in 0..12 {
            let p = 1.08 + i as f64 * 0.0001;
            b.publish("EURUSD", input(p, p + 0.0002)).unwrap();
        }
        let snap = b.snapshot("EURUSD", 100).unwrap();
        assert_eq!(snap.len(), 5);
        // oldest retained should be tick #8 (0-indexed i=7), newest is i=11
        assert_eq!(snap.first().unwrap().seq, 8);
        assert_eq!(snap.last().unwrap().seq, 12);
    }

    #[test]
    fn ticks_delivered_in_strictly_increasing_seq() {
        let b = bus(50);
        let mut rx = b.subscribe_ticks("EURUSD").unwrap();
        for i in 0..5 {
            let p = 1.08 + i as f64 * 0.0001;
            b.publish("EURUSD", input(p, p + 0.0002)).unwrap();
        }
        let mut last_seq = 0u64;
        // drain all observed values in order via history, since watch only
        // exposes the latest value to a late subscriber
        for point in b.snapshot("EURUSD", 100).unwrap() {
            assert!(point.seq > last_seq);
            last_seq = point.seq;
        }
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn trade_event_drop_oldest_counts_drops() {
        let q: DropOldestQueue<u32> = DropOldestQueue::new(3);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.dropped_count(), 2);
        assert_eq!(q.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn unknown_symbol_rejected() {
        let b = bus(10);
        assert!(matches!(b.publish("XXXYYY", input(1.0, 1.1)), Err(EngineError::UnknownSymbol(_))));
    }
}
