//! Structured JSON logging, level- and domain-gated, with periodically
//! flushed counters for the events an operator actually needs to watch:
//! bad ticks, dropped trade-event subscribers, and persistence failures.
//! Writes one JSON line per event to stdout.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Tick,
    Strategy,
    Risk,
    Engine,
    Persistence,
    Backtest,
}

impl Domain {
    fn as_str(&self) -> &'static str {
        match self {
            Domain::Tick => "tick",
            Domain::Strategy => "strategy",
            Domain::Risk => "risk",
            Domain::Engine => "engine",
            Domain::Persistence => "persistence",
            Domain::Backtest => "backtest",
        }
    }

    fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "secret"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

/// Emit one structured JSON line to stdout if `level`/`domain` pass the
/// configured thresholds.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let mut record = Map::new();
    record.insert("ts".into(), json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)));
    record.insert("seq".into(), json!(next_seq()));
    record.insert("level".into(), json!(level.as_str()));
    record.insert("domain".into(), json!(domain.as_str()));
    record.insert("event".into(), json!(event));
    for (k, v) in sanitize_fields(fields) {
        record.insert(k, v);
    }
    println!("{}", Value::Object(record));
}

pub fn log_tick_published(symbol: &str, seq: u64, mid: f64) {
    log(Level::Debug, Domain::Tick, "tick_published", Map::from_iter([("symbol".into(), json!(symbol)), ("seq".into(), json!(seq)), ("mid".into(), json!(mid))]));
}

pub fn log_bad_tick(symbol: &str, reason: &str) {
    log(Level::Warn, Domain::Tick, "bad_tick_rejected", Map::from_iter([("symbol".into(), json!(symbol)), ("reason".into(), json!(reason))]));
}

pub fn log_signal(symbol: &str, kind: &str, confidence: f64, reason_code: &str) {
    log(
        Level::Info,
        Domain::Strategy,
        "signal_emitted",
        Map::from_iter([("symbol".into(), json!(symbol)), ("kind".into(), json!(kind)), ("confidence".into(), json!(confidence)), ("reason_code".into(), json!(reason_code))]),
    );
}

pub fn log_risk_rejection(symbol: &str, code: &str) {
    log(Level::Warn, Domain::Risk, "trade_rejected", Map::from_iter([("symbol".into(), json!(symbol)), ("code".into(), json!(code))]));
}

pub fn log_trade_executed(symbol: &str, side: &str, quantity: f64, price: f64) {
    log(
        Level::Info,
        Domain::Engine,
        "trade_executed",
        Map::from_iter([("symbol".into(), json!(symbol)), ("side".into(), json!(side)), ("quantity".into(), json!(quantity)), ("price".into(), json!(price))]),
    );
}

pub fn log_engine_halted(reason: &str) {
    log(Level::Error, Domain::Engine, "engine_halted", Map::from_iter([("reason".into(), json!(reason))]));
}

pub fn log_persistence_failure(operation: &str, error: &str) {
    log(Level::Error, Domain::Persistence, "persistence_failed", Map::from_iter([("operation".into(), json!(operation)), ("error".into(), json!(error))]));
}

pub fn log_backtest_completed(symbol: &str, total_trades: u32, return_pct: f64) {
    log(
        Level::Info,
        Domain::Backtest,
        "backtest_completed",
        Map::from_iter([("symbol".into(), json!(symbol)), ("total_trades".into(), json!(total_trades)), ("return_pct".into(), json!(return_pct))]),
    );
}

/// Running counters an operator dashboard would poll, rolled up between
/// periodic flushes.
#[derive(Debug, Default)]
pub struct Metrics {
    pub bad_ticks: AtomicU64,
    pub trade_events_dropped: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub trades_executed: AtomicU64,
    pub trades_rejected: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> Value {
        json!({
            "bad_ticks": self.bad_ticks.load(Ordering::Relaxed),
            "trade_events_dropped": self.trade_events_dropped.load(Ordering::Relaxed),
            "persistence_failures": self.persistence_failures.load(Ordering::Relaxed),
            "trades_executed": self.trades_executed.load(Ordering::Relaxed),
            "trades_rejected": self.trades_rejected.load(Ordering::Relaxed),
        })
    }

    pub fn flush_to_log(&self) {
        log(Level::Info, Domain::Engine, "metrics_snapshot", sanitize_fields(self.snapshot().as_object().cloned().unwrap_or_default()));
    }
}
