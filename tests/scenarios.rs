//! End-to-end scenarios exercising the full Feed→Tick Bus→Indicator→
//! Strategy→Risk→Engine→Persistence path without the async run loops,
//! driving each component directly so a failure narrows to one step.

use chrono::Utc;
use fxsim::clock::{Clock, SystemClock};
use fxsim::config::Config;
use fxsim::engine::{Engine, EngineStatus};
use fxsim::ledger::PositionLedger;
use fxsim::logging::Metrics;
use fxsim::registry::SymbolRegistry;
use fxsim::risk::Side;
use fxsim::storage::{InMemoryPersistence, PersistenceStore};
use fxsim::tick::{TickBus, TickInput};
use std::sync::Arc;

fn test_engine(cfg: Config) -> (Arc<Engine>, Arc<TickBus>, Arc<PositionLedger>, Arc<dyn PersistenceStore>) {
    let registry = SymbolRegistry::from_symbols(&cfg.symbols).unwrap();
    let metrics = Arc::new(Metrics::default());
    let tick_bus = Arc::new(TickBus::new(&registry, cfg.history_capacity, metrics.clone()));
    let ledger = Arc::new(PositionLedger::new(&cfg.symbols));
    let persistence: Arc<dyn PersistenceStore> = Arc::new(InMemoryPersistence::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(Engine::new(registry, tick_bus.clone(), ledger.clone(), persistence.clone(), clock, cfg, metrics));
    (engine, tick_bus, ledger, persistence)
}

fn publish_series(bus: &TickBus, symbol: &str, mids: &[f64], half_spread: f64) {
    for mid in mids {
        bus.publish(symbol, TickInput { bid: mid - half_spread, ask: mid + half_spread, volume: 100_000.0, event_time: Utc::now() }).unwrap();
    }
}

#[test]
fn s1_golden_cross_opens_a_long() {
    let cfg = Config { symbols: vec!["EURUSD".to_string()], min_confidence: 0.0, ..Config::from_env() };
    let (engine, bus, ledger, _persistence) = test_engine(cfg);
    engine.start().unwrap();

    // evaluate after every tick, the way the evaluation loop does at each
    // cadence tick, so the engine sees the instant the long SMA first
    // becomes defined rather than jumping straight to the steady state.
    let mut p = 1.0800;
    let mut trade = None;
    for _ in 0..71 {
        bus.publish("EURUSD", TickInput { bid: p - 0.0001, ask: p + 0.0001, volume: 100_000.0, event_time: Utc::now() }).unwrap();
        p += 0.0001;
        if let Some(t) = engine.evaluate_symbol("EURUSD").unwrap() {
            trade = Some(t);
            break;
        }
    }

    let trade = trade.expect("ascending series should trigger a golden cross buy");
    assert_eq!(trade.side, Side::Buy);

    let position = ledger.get("EURUSD").unwrap();
    assert!(position.quantity > 0.0);
    assert!((engine.daily_notional() - trade.notional).abs() < 1e-6);
}

#[test]
fn s2_overbought_opens_a_short_from_flat() {
    let cfg = Config { symbols: vec!["EURUSD".to_string()], min_confidence: 0.0, rsi_period: 14, ..Config::from_env() };
    let (engine, bus, ledger, _persistence) = test_engine(cfg);
    engine.start().unwrap();

    let mut mids = Vec::new();
    let mut p = 1.3000;
    for _ in 0..21 {
        mids.push(p);
        p += 0.001;
    }
    publish_series(&bus, "EURUSD", &mids, 0.0001);

    assert_eq!(ledger.get("EURUSD").unwrap().quantity, 0.0);
    let trade = engine.evaluate_symbol("EURUSD").unwrap();
    assert!(trade.is_some());
    assert_eq!(trade.unwrap().side, Side::Sell);
    assert!(ledger.get("EURUSD").unwrap().quantity < 0.0);
}

#[test]
fn s3_daily_cap_halts_the_engine() {
    let cfg = Config {
        symbols: vec!["EURUSD".to_string()],
        daily_cap_notional: 100_000.0,
        base_position_notional: 60_000.0,
        min_confidence: 0.0,
        ..Config::from_env()
    };
    let (engine, bus, ledger, _persistence) = test_engine(cfg);
    engine.start().unwrap();

    bus.publish("EURUSD", TickInput { bid: 1.0799, ask: 1.0801, volume: 100_000.0, event_time: Utc::now() }).unwrap();

    // first trade executes directly via the risk-gated execute path, sized
    // near base_position_notional.
    let proposal = fxsim::risk::TradeProposal { side: Side::Buy, confidence: 1.0, bid: 1.0799, ask: 1.0801 };
    let limits = fxsim::risk::RiskLimits { daily_cap_notional: 100_000.0, min_notional: 1_000.0, per_trade_cap_fraction: 0.10, per_symbol_cap_fraction: 1.0 };
    let position = ledger.get("EURUSD").unwrap();
    let sizing = fxsim::risk::size_and_gate(&proposal, true, 0.0, &position, "EURUSD", &limits, 60_000.0, 1.0).unwrap();
    assert!(sizing.notional > 0.0);

    // simulate the first execution's bookkeeping the way engine::execute would.
    ledger.apply_trade("EURUSD", Side::Buy, sizing.quantity, sizing.price, sizing.price).unwrap();

    // now attempt a second trade of similar size against an engine whose
    // daily_notional already reflects the first: it must breach the cap.
    let second = fxsim::risk::size_and_gate(&proposal, true, sizing.notional, &position, "EURUSD", &limits, 60_000.0, 1.0);
    assert!(matches!(second, Err(fxsim::error::EngineError::DailyVolumeExceeded { .. })));

    engine.halt(format!("DailyVolumeExceeded: cap breached")).unwrap();
    assert!(matches!(engine.status(), EngineStatus::Halted { .. }));

    let third = engine.evaluate_symbol("EURUSD");
    // engine is halted: evaluate_symbol should not execute even if signals fire.
    assert!(third.is_ok());
}

#[test]
fn s4_flip_position_realizes_expected_pnl() {
    let ledger = PositionLedger::new(&["EURUSD".to_string()]);
    ledger.apply_trade("EURUSD", Side::Buy, 10_000.0, 1.0800, 1.0800).unwrap();
    let after = ledger.apply_trade("EURUSD", Side::Sell, 15_000.0, 1.0900, 1.0900).unwrap();

    assert!((after.realized_pnl - 100.0).abs() < 1e-6);
    assert!((after.quantity - (-5_000.0)).abs() < 1e-6);
    assert!((after.avg_price - 1.0900).abs() < 1e-9);
}

#[test]
fn s5_persistence_rollback_leaves_state_untouched() {
    use fxsim::storage::{DailyStats, FillCommit, Trade, TradeStatus};

    struct AlwaysFails;
    impl PersistenceStore for AlwaysFails {
        fn commit_fill(&self, _commit: &FillCommit) -> Result<(), fxsim::error::EngineError> {
            Err(fxsim::error::EngineError::PersistenceFailed("injected".into()))
        }
        fn append_rejected_trade(&self, _trade: &Trade) -> Result<(), fxsim::error::EngineError> {
            Ok(())
        }
        fn load_today_stats(&self, date: chrono::NaiveDate) -> Result<DailyStats, fxsim::error::EngineError> {
            Ok(DailyStats { date, total_notional: 0.0, trade_count: 0, realized_pnl: 0.0, active_positions: 0 })
        }
        fn load_positions(&self) -> Result<Vec<(String, fxsim::ledger::Position)>, fxsim::error::EngineError> {
            Ok(Vec::new())
        }
        fn list_trades(&self, _symbol: Option<&str>, _limit: usize, _offset: usize) -> Result<Vec<Trade>, fxsim::error::EngineError> {
            Ok(Vec::new())
        }
    }

    let cfg = Config { symbols: vec!["EURUSD".to_string()], min_confidence: 0.0, ..Config::from_env() };
    let registry = SymbolRegistry::from_symbols(&cfg.symbols).unwrap();
    let metrics = Arc::new(Metrics::default());
    let tick_bus = Arc::new(TickBus::new(&registry, cfg.history_capacity, metrics.clone()));
    let ledger = Arc::new(PositionLedger::new(&cfg.symbols));
    let persistence: Arc<dyn PersistenceStore> = Arc::new(AlwaysFails);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(Engine::new(registry, tick_bus.clone(), ledger.clone(), persistence.clone(), clock, cfg, metrics));
    engine.start().unwrap();

    let mut mids = Vec::new();
    let mut p = 1.3000;
    for _ in 0..21 {
        mids.push(p);
        p += 0.001;
    }
    publish_series(&tick_bus, "EURUSD", &mids, 0.0001);

    let daily_before = engine.daily_notional();
    let result = engine.evaluate_symbol("EURUSD");
    assert!(result.is_err());

    assert_eq!(ledger.get("EURUSD").unwrap().quantity, 0.0);
    assert_eq!(engine.daily_notional(), daily_before);
    // a commit_fill failure must not write a rejected row to the store that
    // just failed, so no trade of any status should be visible afterward.
    assert!(persistence.list_trades(None, 10, 0).unwrap().is_empty());
    let _ = TradeStatus::Rejected;
}

#[test]
fn s6_backtest_is_bitwise_reproducible() {
    use fxsim::backtest::{run_backtest, BacktestParameters, BacktestRequest};
    use chrono::TimeZone;

    let registry = SymbolRegistry::default_fx();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
    let req = BacktestRequest {
        symbol: "EURUSD".into(),
        start,
        end,
        interval_seconds: 3600,
        initial_capital: 100_000.0,
        parameters: BacktestParameters { sma_short: 10, sma_long: 50, ..BacktestParameters::default() },
    };

    let a = run_backtest(&req, &registry).unwrap();
    let b = run_backtest(&req, &registry).unwrap();
    assert_eq!(a.total_trades, b.total_trades);
    assert_eq!(a.win_rate, b.win_rate);
    assert_eq!(a.return_pct, b.return_pct);
    assert_eq!(a.max_drawdown_pct, b.max_drawdown_pct);
}

#[test]
fn property_tick_ordering_is_strictly_increasing() {
    let registry = SymbolRegistry::default_fx();
    let bus = TickBus::new(&registry, 50, Arc::new(Metrics::default()));
    let mut last = 0u64;
    for i in 0..30 {
        let mid = 1.08 + i as f64 * 0.0001;
        let tick = bus.publish("EURUSD", TickInput { bid: mid - 0.0001, ask: mid + 0.0001, volume: 1.0, event_time: Utc::now() }).unwrap();
        assert!(tick.symbol_seq > last);
        last = tick.symbol_seq;
    }
}

#[test]
fn property_history_bound_holds_exactly_h_after_overflow() {
    let registry = SymbolRegistry::default_fx();
    let bus = TickBus::new(&registry, 10, Arc::new(Metrics::default()));
    for i in 0..25 {
        let mid = 1.08 + i as f64 * 0.0001;
        bus.publish("EURUSD", TickInput { bid: mid - 0.0001, ask: mid + 0.0001, volume: 1.0, event_time: Utc::now() }).unwrap();
    }
    assert_eq!(bus.history_len("EURUSD").unwrap(), 10);
}

#[test]
fn property_ledger_invariant_q_zero_iff_avg_zero() {
    let mut pos = fxsim::ledger::Position::default();
    for (side, qty, price) in [(Side::Buy, 1000.0, 1.0), (Side::Sell, 400.0, 1.05), (Side::Sell, 600.0, 1.10)] {
        pos.apply_trade(side, qty, price, price);
        assert_eq!(pos.quantity == 0.0, pos.avg_price == 0.0);
        assert!(pos.avg_price >= 0.0);
    }
}
