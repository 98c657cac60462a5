//! Trading Engine: owns the single source of truth for running/halted
//! state and drives the mark and evaluation loops.
//!
//! One struct owns the mutable state; a single execution path mutates it.
//! A fill is committed to persistence before it touches the in-memory
//! ledger or daily notional total, so a failed commit leaves nothing to
//! roll back — the position update only ever happens on a local copy
//! until the commit succeeds.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

use crate::clock::{utc_date, Clock, IdGenerator};
use crate::config::Config;
use crate::error::EngineError;
use crate::indicators::compute_snapshot;
use crate::ledger::PositionLedger;
use crate::logging::{self, Metrics};
use crate::registry::SymbolRegistry;
use crate::risk::{self, RiskLimits, Side, TradeProposal};
use crate::storage::{DailyStats, FillCommit, PersistenceStore, Trade, TradeStatus};
use crate::strategy::{bollinger_strategy, consensus, rsi_strategy, sma_crossover, SignalKind};
use crate::tick::{Tick, TickBus, TradeEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    Stopped,
    Running,
    Halted { reason: String },
}

struct EngineInner {
    status: EngineStatus,
    current_date: NaiveDate,
    daily_notional: f64,
    daily_trade_count: u64,
}

pub struct Engine {
    state: Mutex<EngineInner>,
    registry: SymbolRegistry,
    tick_bus: Arc<TickBus>,
    ledger: Arc<PositionLedger>,
    persistence: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    limits: RiskLimits,
    cfg: Config,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        registry: SymbolRegistry,
        tick_bus: Arc<TickBus>,
        ledger: Arc<PositionLedger>,
        persistence: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        cfg: Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        let limits = RiskLimits {
            daily_cap_notional: cfg.daily_cap_notional,
            min_notional: cfg.min_notional,
            per_trade_cap_fraction: cfg.per_trade_cap_fraction,
            per_symbol_cap_fraction: cfg.per_symbol_cap_fraction,
        };
        let current_date = utc_date(clock.now_wall());
        Self {
            state: Mutex::new(EngineInner { status: EngineStatus::Stopped, current_date, daily_notional: 0.0, daily_trade_count: 0 }),
            registry,
            tick_bus,
            ledger,
            persistence,
            clock,
            ids: IdGenerator::new(),
            limits,
            cfg,
            metrics,
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.state.lock().status.clone()
    }

    pub fn daily_notional(&self) -> f64 {
        self.state.lock().daily_notional
    }

    pub fn executed_count(&self) -> u64 {
        self.metrics.trades_executed.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.metrics.trades_rejected.load(Ordering::Relaxed)
    }

    /// Only valid from `Stopped`. Loads today's running stats from
    /// persistence so a restart doesn't reset the daily cap or trade count.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.status != EngineStatus::Stopped {
            return Err(EngineError::Misconfigured("start() requires Stopped".into()));
        }
        let today = utc_date(self.clock.now_wall());
        let stats = self.persistence.load_today_stats(today)?;
        state.current_date = today;
        state.daily_notional = stats.total_notional;
        state.daily_trade_count = stats.trade_count;
        state.status = EngineStatus::Running;
        Ok(())
    }

    /// Only valid from `Running`. The evaluation loop stops proposing new
    /// trades; marking continues.
    pub fn halt(&self, reason: String) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.status != EngineStatus::Running {
            return Err(EngineError::Misconfigured("halt() requires Running".into()));
        }
        state.status = EngineStatus::Halted { reason: reason.clone() };
        logging::log_engine_halted(&reason);
        Ok(())
    }

    /// Valid from any state.
    pub fn stop(&self) {
        self.state.lock().status = EngineStatus::Stopped;
    }

    fn is_running(&self) -> bool {
        matches!(self.state.lock().status, EngineStatus::Running)
    }

    /// UTC-midnight rollover: zero the daily notional and, if the halt was
    /// self-inflicted by the daily cap, allow the engine back to Running.
    fn maybe_rollover(&self, now: chrono::DateTime<Utc>) {
        let today = utc_date(now);
        let mut state = self.state.lock();
        if state.current_date != today {
            state.current_date = today;
            state.daily_notional = 0.0;
            state.daily_trade_count = 0;
            if let EngineStatus::Halted { reason } = &state.status {
                if reason.contains("DailyVolumeExceeded") {
                    state.status = EngineStatus::Running;
                }
            }
        }
    }

    /// Mark loop entry point: called once per tick for a symbol.
    pub fn on_tick(&self, symbol: &str, tick: Tick) -> Result<(), EngineError> {
        self.maybe_rollover(tick.event_time);
        self.ledger.mark(symbol, tick.mid)?;
        Ok(())
    }

    /// Evaluation loop entry point: called at a fixed cadence for every
    /// symbol. Builds the consensus signal, and if it clears the
    /// confidence bar and is compatible with the existing position,
    /// attempts execution.
    pub fn evaluate_symbol(&self, symbol: &str) -> Result<Option<Trade>, EngineError> {
        let window = (self.cfg.sma_long + 1).max(21);
        let history = self.tick_bus.snapshot(symbol, window)?;
        let prices: Vec<f64> = history.iter().map(|p| p.mid).collect();
        if prices.len() < 2 {
            return Ok(None);
        }

        let current_snapshot = compute_snapshot(&prices, self.cfg.sma_short, self.cfg.sma_long, self.cfg.rsi_period, self.cfg.bb_period, self.cfg.bb_std);
        let prev_snapshot = compute_snapshot(&prices[..prices.len() - 1], self.cfg.sma_short, self.cfg.sma_long, self.cfg.rsi_period, self.cfg.bb_period, self.cfg.bb_std);
        let mid = *prices.last().unwrap();

        let sma_signal = sma_crossover(prev_snapshot, current_snapshot);
        let rsi_signal = rsi_strategy(current_snapshot, self.cfg.rsi_oversold, self.cfg.rsi_overbought);
        let bb_signal = bollinger_strategy(current_snapshot, mid);
        let combined = consensus(&[sma_signal, rsi_signal, bb_signal], current_snapshot);

        if combined.kind == SignalKind::Hold || combined.confidence < self.cfg.min_confidence {
            return Ok(None);
        }

        let position = self.ledger.get(symbol)?;
        let compatible = match combined.kind {
            SignalKind::Buy => position.quantity <= 0.0,
            SignalKind::Sell => position.quantity >= 0.0,
            SignalKind::Hold => false,
        };
        if !compatible {
            return Ok(None);
        }

        let tick = self.tick_bus.latest(symbol)?.ok_or_else(|| EngineError::BadTick { symbol: symbol.to_string(), reason: "no tick yet".into() })?;
        let side = if combined.kind == SignalKind::Buy { Side::Buy } else { Side::Sell };
        let proposal = TradeProposal { side, confidence: combined.confidence, bid: tick.bid, ask: tick.ask };

        self.execute(symbol, proposal, "combined_analysis")
    }

    fn execute(&self, symbol: &str, proposal: TradeProposal, strategy_tag: &str) -> Result<Option<Trade>, EngineError> {
        let (running, daily_notional, daily_trade_count) = {
            let state = self.state.lock();
            (matches!(state.status, EngineStatus::Running), state.daily_notional, state.daily_trade_count)
        };
        let position = self.ledger.get(symbol)?;

        let sizing = match risk::size_and_gate(&proposal, running, daily_notional, &position, symbol, &self.limits, self.cfg.base_position_notional, self.cfg.lot_step) {
            Ok(sizing) => sizing,
            Err(err) => {
                if matches!(err, EngineError::DailyVolumeExceeded { .. }) {
                    let _ = self.halt(format!("DailyVolumeExceeded: {err}"));
                }
                self.record_rejection(symbol, proposal, strategy_tag, &err)?;
                return Err(err);
            }
        };

        let trade_id = self.ids.next_trade_id();
        let seq = self.ids.next_seq();
        let now = self.clock.now_wall();
        let trade = Trade {
            id: trade_id.to_string(),
            symbol: symbol.to_string(),
            side: proposal.side,
            quantity: sizing.quantity,
            price: sizing.price,
            notional: sizing.notional,
            strategy_tag: strategy_tag.to_string(),
            status: TradeStatus::Executed,
            reject_reason: None,
            event_time: now,
            seq,
        };

        let mark = (proposal.bid + proposal.ask) / 2.0;
        let new_position = {
            let mut updated = position;
            updated.apply_trade(proposal.side, sizing.quantity, sizing.price, mark);
            updated
        };

        let today = utc_date(now);
        let new_daily_notional = daily_notional + sizing.notional;
        let new_trade_count = daily_trade_count + 1;
        let active_positions = self
            .ledger
            .all_snapshots(now)
            .iter()
            .map(|snap| if snap.symbol == symbol { new_position.quantity } else { snap.quantity })
            .filter(|qty| *qty != 0.0)
            .count() as u32;
        let daily_stats = DailyStats { date: today, total_notional: new_daily_notional, trade_count: new_trade_count, realized_pnl: new_position.realized_pnl, active_positions };

        let commit = FillCommit { trade: trade.clone(), symbol: symbol.to_string(), position: new_position, daily_stats };

        if let Err(err) = self.persistence.commit_fill(&commit) {
            // nothing in memory has been mutated yet except via the local
            // `updated` copy above, so there's nothing to undo on the
            // ledger. A persisted REJECTED row would land in the same store
            // that just failed, so this failure is only logged, never
            // recorded as a trade.
            self.metrics.persistence_failures.fetch_add(1, Ordering::Relaxed);
            logging::log_persistence_failure("commit_fill", &err.to_string());
            return Err(err);
        }

        self.ledger.apply_trade(symbol, proposal.side, sizing.quantity, sizing.price, mark)?;
        {
            let mut state = self.state.lock();
            state.daily_notional = new_daily_notional;
            state.daily_trade_count = new_trade_count;
        }
        self.metrics.trades_executed.fetch_add(1, Ordering::Relaxed);
        logging::log_trade_executed(symbol, &format!("{:?}", proposal.side), sizing.quantity, sizing.price);

        self.tick_bus.publish_trade(
            symbol,
            TradeEvent { trade_id: trade.id.clone(), symbol: symbol.to_string(), side: format!("{:?}", proposal.side), quantity: sizing.quantity, price: sizing.price, status: "EXECUTED".into(), event_time: now },
        )?;

        Ok(Some(trade))
    }

    fn record_rejection(&self, symbol: &str, proposal: TradeProposal, strategy_tag: &str, err: &EngineError) -> Result<(), EngineError> {
        self.metrics.trades_rejected.fetch_add(1, Ordering::Relaxed);
        logging::log_risk_rejection(symbol, err.code());
        let now = self.clock.now_wall();
        let trade = Trade {
            id: self.ids.next_trade_id().to_string(),
            symbol: symbol.to_string(),
            side: proposal.side,
            quantity: 0.0,
            price: 0.0,
            notional: 0.0,
            strategy_tag: strategy_tag.to_string(),
            status: TradeStatus::Rejected,
            reject_reason: Some(err.code().to_string()),
            event_time: now,
            seq: self.ids.next_seq(),
        };
        self.persistence.append_rejected_trade(&trade)
    }

    /// Runs the mark loop (one subscription per symbol) and the evaluation
    /// loop (a fixed-cadence interval) concurrently until `shutdown`
    /// resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let symbols: Vec<String> = self.registry.symbols().cloned().collect();
        let mut mark_tasks = Vec::new();
        for symbol in symbols.clone() {
            let engine = self.clone();
            let mut rx = match self.tick_bus.subscribe_ticks(&symbol) {
                Ok(rx) => rx,
                Err(_) => continue,
            };
            let mut shutdown_rx = shutdown.clone();
            mark_tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if let Some(tick) = *rx.borrow() {
                                let _ = engine.on_tick(&symbol, tick);
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let mut interval = tokio::time::interval(Duration::from_millis(self.cfg.evaluation_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.is_running() {
                        for symbol in &symbols {
                            let _ = self.evaluate_symbol(symbol);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for task in mark_tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::InMemoryPersistence;
    use crate::tick::TickInput;

    fn engine_with(cfg: Config) -> (Arc<Engine>, Arc<TickBus>) {
        let registry = SymbolRegistry::default_fx();
        let metrics = Arc::new(Metrics::default());
        let tick_bus = Arc::new(TickBus::new(&registry, cfg.history_capacity, metrics.clone()));
        let ledger = Arc::new(PositionLedger::new(&registry.symbols().cloned().collect::<Vec<_>>()));
        let persistence: Arc<dyn PersistenceStore> = Arc::new(InMemoryPersistence::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = Arc::new(Engine::new(registry, tick_bus.clone(), ledger, persistence, clock, cfg, metrics));
        (engine, tick_bus)
    }

    #[test]
    fn start_requires_stopped_state() {
        let (engine, _bus) = engine_with(Config::from_env());
        engine.start().unwrap();
        assert!(engine.start().is_err());
    }

    #[test]
    fn halt_requires_running_state() {
        let (engine, _bus) = engine_with(Config::from_env());
        assert!(engine.halt("test".into()).is_err());
        engine.start().unwrap();
        assert!(engine.halt("test".into()).is_ok());
        assert!(matches!(engine.status(), EngineStatus::Halted { .. }));
    }

    #[test]
    fn stop_is_valid_from_any_state() {
        let (engine, _bus) = engine_with(Config::from_env());
        engine.stop();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        engine.start().unwrap();
        engine.stop();
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[test]
    fn mark_loop_updates_unrealized_pnl_for_held_positions() {
        let (engine, bus) = engine_with(Config::from_env());
        engine.start().unwrap();
        engine.ledger.apply_trade("EURUSD", Side::Buy, 1000.0, 1.08, 1.08).unwrap();
        let tick = bus.publish("EURUSD", TickInput { bid: 1.0999, ask: 1.1001, volume: 100_000.0, event_time: Utc::now() }).unwrap();
        engine.on_tick("EURUSD", tick).unwrap();
        let pos = engine.ledger.get("EURUSD").unwrap();
        assert!(pos.unrealized_pnl > 0.0);
    }

    #[test]
    fn evaluate_symbol_holds_without_enough_history() {
        let (engine, _bus) = engine_with(Config::from_env());
        engine.start().unwrap();
        let result = engine.evaluate_symbol("EURUSD").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn evaluate_symbol_skips_execution_when_engine_not_running() {
        let (engine, bus) = engine_with(Config { min_confidence: 0.0, ..Config::from_env() });
        for i in 0..60 {
            let p = 1.08 + i as f64 * 0.001;
            bus.publish("EURUSD", TickInput { bid: p, ask: p + 0.0002, volume: 100_000.0, event_time: Utc::now() }).unwrap();
        }
        // never started: status is Stopped
        let result = engine.evaluate_symbol("EURUSD");
        assert!(result.is_err() || result.unwrap().is_none());
    }
}
