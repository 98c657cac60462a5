//! Persistence Store: durable record of trades, positions, and daily
//! stats, committed atomically per fill — a single `conn.transaction()`
//! writing all three tables, so a fill updates every table or none.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::ledger::Position;
use crate::risk::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Executed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
    pub strategy_tag: String,
    pub status: TradeStatus,
    pub reject_reason: Option<String>,
    pub event_time: DateTime<Utc>,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_notional: f64,
    pub trade_count: u64,
    pub realized_pnl: f64,
    pub active_positions: u32,
}

/// Everything a single fill must commit atomically: the trade record, the
/// resulting position, and the day's running totals.
#[derive(Debug, Clone)]
pub struct FillCommit {
    pub trade: Trade,
    pub symbol: String,
    pub position: Position,
    pub daily_stats: DailyStats,
}

pub trait PersistenceStore: Send + Sync {
    fn commit_fill(&self, commit: &FillCommit) -> Result<(), EngineError>;
    fn append_rejected_trade(&self, trade: &Trade) -> Result<(), EngineError>;
    /// The persisted `daily_stats` row for `date`, or a zeroed one if the
    /// day hasn't had a fill yet.
    fn load_today_stats(&self, date: NaiveDate) -> Result<DailyStats, EngineError>;
    fn load_positions(&self) -> Result<Vec<(String, Position)>, EngineError>;
    fn list_trades(&self, symbol: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Trade>, EngineError>;
}

fn empty_daily_stats(date: NaiveDate) -> DailyStats {
    DailyStats { date, total_notional: 0.0, trade_count: 0, realized_pnl: 0.0, active_positions: 0 }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> Side {
    if s == "BUY" {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn status_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Executed => "EXECUTED",
        TradeStatus::Rejected => "REJECTED",
    }
}

pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn open(path: &str) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), EngineError> {
        self.conn
            .lock()
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS trades (
                    id TEXT PRIMARY KEY,
                    symbol TEXT NOT NULL,
                    side TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    price REAL NOT NULL,
                    notional REAL NOT NULL,
                    strategy_tag TEXT NOT NULL,
                    status TEXT NOT NULL,
                    reject_reason TEXT,
                    event_time TEXT NOT NULL,
                    seq INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS positions (
                    symbol TEXT PRIMARY KEY,
                    quantity REAL NOT NULL,
                    avg_price REAL NOT NULL,
                    realized_pnl REAL NOT NULL,
                    unrealized_pnl REAL NOT NULL
                );
                CREATE TABLE IF NOT EXISTS daily_stats (
                    date TEXT PRIMARY KEY,
                    total_notional REAL NOT NULL,
                    trade_count INTEGER NOT NULL,
                    realized_pnl REAL NOT NULL,
                    active_positions INTEGER NOT NULL
                );
                ",
            )
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))
    }
}

impl PersistenceStore for SqlitePersistence {
    fn commit_fill(&self, commit: &FillCommit) -> Result<(), EngineError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO trades (id, symbol, side, quantity, price, notional, strategy_tag, status, reject_reason, event_time, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                commit.trade.id,
                commit.trade.symbol,
                side_str(commit.trade.side),
                commit.trade.quantity,
                commit.trade.price,
                commit.trade.notional,
                commit.trade.strategy_tag,
                status_str(commit.trade.status),
                commit.trade.reject_reason,
                commit.trade.event_time.to_rfc3339(),
                commit.trade.seq as i64,
            ],
        )
        .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;

        tx.execute(
            "INSERT INTO positions (symbol, quantity, avg_price, realized_pnl, unrealized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(symbol) DO UPDATE SET quantity=excluded.quantity, avg_price=excluded.avg_price,
                realized_pnl=excluded.realized_pnl, unrealized_pnl=excluded.unrealized_pnl",
            rusqlite::params![commit.symbol, commit.position.quantity, commit.position.avg_price, commit.position.realized_pnl, commit.position.unrealized_pnl],
        )
        .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;

        tx.execute(
            "INSERT INTO daily_stats (date, total_notional, trade_count, realized_pnl, active_positions)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(date) DO UPDATE SET total_notional=excluded.total_notional, trade_count=excluded.trade_count,
                realized_pnl=excluded.realized_pnl, active_positions=excluded.active_positions",
            rusqlite::params![
                commit.daily_stats.date.to_string(),
                commit.daily_stats.total_notional,
                commit.daily_stats.trade_count as i64,
                commit.daily_stats.realized_pnl,
                commit.daily_stats.active_positions,
            ],
        )
        .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;

        tx.commit().map_err(|e| EngineError::PersistenceFailed(e.to_string()))
    }

    fn append_rejected_trade(&self, trade: &Trade) -> Result<(), EngineError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO trades (id, symbol, side, quantity, price, notional, strategy_tag, status, reject_reason, event_time, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    trade.id,
                    trade.symbol,
                    side_str(trade.side),
                    trade.quantity,
                    trade.price,
                    trade.notional,
                    trade.strategy_tag,
                    status_str(trade.status),
                    trade.reject_reason,
                    trade.event_time.to_rfc3339(),
                    trade.seq as i64,
                ],
            )
            .map(|_| ())
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))
    }

    fn load_today_stats(&self, date: NaiveDate) -> Result<DailyStats, EngineError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT total_notional, trade_count, realized_pnl, active_positions FROM daily_stats WHERE date = ?1",
            [date.to_string()],
            |row| {
                Ok(DailyStats {
                    date,
                    total_notional: row.get(0)?,
                    trade_count: row.get::<_, i64>(1)? as u64,
                    realized_pnl: row.get(2)?,
                    active_positions: row.get::<_, i64>(3)? as u32,
                })
            },
        )
        .or_else(|_| Ok(empty_daily_stats(date)))
    }

    fn load_positions(&self) -> Result<Vec<(String, Position)>, EngineError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT symbol, quantity, avg_price, realized_pnl, unrealized_pnl FROM positions")
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Position { quantity: row.get(1)?, avg_price: row.get(2)?, realized_pnl: row.get(3)?, unrealized_pnl: row.get(4)? },
                ))
            })
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::PersistenceFailed(e.to_string()))
    }

    fn list_trades(&self, symbol: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Trade>, EngineError> {
        let conn = self.conn.lock();
        let sql = "SELECT id, symbol, side, quantity, price, notional, strategy_tag, status, reject_reason, event_time, seq
                    FROM trades WHERE (?1 IS NULL OR symbol = ?1) ORDER BY event_time DESC, seq DESC LIMIT ?2 OFFSET ?3";
        let mut stmt = conn.prepare(sql).map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![symbol, limit as i64, offset as i64], |row| {
                let event_time: String = row.get(9)?;
                Ok(Trade {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                    side: side_from_str(&row.get::<_, String>(2)?),
                    quantity: row.get(3)?,
                    price: row.get(4)?,
                    notional: row.get(5)?,
                    strategy_tag: row.get(6)?,
                    status: if row.get::<_, String>(7)? == "EXECUTED" { TradeStatus::Executed } else { TradeStatus::Rejected },
                    reject_reason: row.get(8)?,
                    event_time: DateTime::parse_from_rfc3339(&event_time).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
                    seq: row.get::<_, i64>(10)? as u64,
                })
            })
            .map_err(|e| EngineError::PersistenceFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| EngineError::PersistenceFailed(e.to_string()))
    }
}

/// Wraps a real store and fails the Nth `commit_fill` call on command, so
/// tests can exercise the engine's rollback path without a flaky real
/// failure source.
#[cfg(test)]
pub struct FaultInjectingPersistence {
    inner: SqlitePersistence,
    fail_at_call: usize,
    calls: AtomicUsize,
}

#[cfg(test)]
impl FaultInjectingPersistence {
    pub fn new(inner: SqlitePersistence, fail_at_call: usize) -> Self {
        Self { inner, fail_at_call, calls: AtomicUsize::new(0) }
    }
}

#[cfg(test)]
impl PersistenceStore for FaultInjectingPersistence {
    fn commit_fill(&self, commit: &FillCommit) -> Result<(), EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at_call {
            return Err(EngineError::PersistenceFailed("injected fault".into()));
        }
        self.inner.commit_fill(commit)
    }

    fn append_rejected_trade(&self, trade: &Trade) -> Result<(), EngineError> {
        self.inner.append_rejected_trade(trade)
    }

    fn load_today_stats(&self, date: NaiveDate) -> Result<DailyStats, EngineError> {
        self.inner.load_today_stats(date)
    }

    fn load_positions(&self) -> Result<Vec<(String, Position)>, EngineError> {
        self.inner.load_positions()
    }

    fn list_trades(&self, symbol: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Trade>, EngineError> {
        self.inner.list_trades(symbol, limit, offset)
    }
}

/// A pure in-memory store, useful for unit tests that don't want a
/// filesystem or sqlite dependency in the loop at all.
#[cfg(any(test, feature = "test-util"))]
pub struct InMemoryPersistence {
    trades: Mutex<Vec<Trade>>,
    positions: Mutex<HashMap<String, Position>>,
    daily: Mutex<HashMap<NaiveDate, DailyStats>>,
}

#[cfg(any(test, feature = "test-util"))]
impl InMemoryPersistence {
    pub fn new() -> Self {
        Self { trades: Mutex::new(Vec::new()), positions: Mutex::new(HashMap::new()), daily: Mutex::new(HashMap::new()) }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl PersistenceStore for InMemoryPersistence {
    fn commit_fill(&self, commit: &FillCommit) -> Result<(), EngineError> {
        self.trades.lock().push(commit.trade.clone());
        self.positions.lock().insert(commit.symbol.clone(), commit.position);
        self.daily.lock().insert(commit.daily_stats.date, commit.daily_stats);
        Ok(())
    }

    fn append_rejected_trade(&self, trade: &Trade) -> Result<(), EngineError> {
        self.trades.lock().push(trade.clone());
        Ok(())
    }

    fn load_today_stats(&self, date: NaiveDate) -> Result<DailyStats, EngineError> {
        Ok(self.daily.lock().get(&date).copied().unwrap_or_else(|| empty_daily_stats(date)))
    }

    fn load_positions(&self) -> Result<Vec<(String, Position)>, EngineError> {
        Ok(self.positions.lock().iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn list_trades(&self, symbol: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Trade>, EngineError> {
        let trades = self.trades.lock();
        let mut filtered: Vec<Trade> = trades.iter().filter(|t| symbol.map(|s| s == t.symbol).unwrap_or(true)).cloned().collect();
        filtered.sort_by(|a, b| b.event_time.cmp(&a.event_time).then(b.seq.cmp(&a.seq)));
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }
}
