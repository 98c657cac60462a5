//! Error kinds and their dispositions, per the error-handling design.
//!
//! Every fallible boundary operation in this crate returns `Result<T,
//! EngineError>`. Strategy-layer "no history yet" cases are never an error —
//! they surface as a HOLD signal with a reason code instead (see
//! `crate::strategy`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("bad tick for {symbol}: {reason}")]
    BadTick { symbol: String, reason: String },

    #[error("engine halted: {reason}")]
    EngineHalted { reason: String },

    #[error("daily volume cap exceeded: requested {requested:.2}, cap {cap:.2}")]
    DailyVolumeExceeded { requested: f64, cap: f64 },

    #[error("trade too large: notional {notional:.2} exceeds per-trade cap {cap:.2}")]
    TradeTooLarge { notional: f64, cap: f64 },

    #[error("symbol exposure exceeded for {symbol}: {exposure:.2} > {cap:.2}")]
    SymbolExposureExceeded { symbol: String, exposure: f64, cap: f64 },

    #[error("persistence operation failed: {0}")]
    PersistenceFailed(String),

    #[error("misconfigured: {0}")]
    Misconfigured(String),
}

impl EngineError {
    /// Machine-readable error code, stable across versions.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownSymbol(_) => "UnknownSymbol",
            EngineError::BadTick { .. } => "BadTick",
            EngineError::EngineHalted { .. } => "EngineHalted",
            EngineError::DailyVolumeExceeded { .. } => "DailyVolumeExceeded",
            EngineError::TradeTooLarge { .. } => "TradeTooLarge",
            EngineError::SymbolExposureExceeded { .. } => "SymbolExposureExceeded",
            EngineError::PersistenceFailed(_) => "PersistenceFailed",
            EngineError::Misconfigured(_) => "Misconfigured",
        }
    }
}
