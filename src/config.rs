//! Configuration: every tunable recognized by the system, loaded from the
//! environment with documented defaults.

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,

    // Risk gate
    pub daily_cap_notional: f64,
    pub base_position_notional: f64,
    pub min_notional: f64,
    pub min_confidence: f64,
    pub per_trade_cap_fraction: f64,
    pub per_symbol_cap_fraction: f64,
    pub lot_step: f64,

    // Indicators / strategies
    pub sma_short: usize,
    pub sma_long: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub bb_period: usize,
    pub bb_std: f64,

    // Tick bus / feed
    pub history_capacity: usize,
    pub tick_interval_min_ms: u64,
    pub tick_interval_max_ms: u64,
    pub volatility_sigma: f64,
    pub evaluation_interval_ms: u64,
    pub trade_event_buffer: usize,

    // Persistence
    pub sqlite_path: String,
    pub persistence_timeout_ms: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            symbols: std::env::var("FX_SYMBOLS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| {
                    vec!["EURUSD".to_string(), "GBPUSD".to_string(), "USDJPY".to_string()]
                }),

            daily_cap_notional: env_or("DAILY_CAP_NOTIONAL", 10_000_000.0),
            base_position_notional: env_or("BASE_POSITION_NOTIONAL", 10_000.0),
            min_notional: env_or("MIN_NOTIONAL", 1_000.0),
            min_confidence: env_or("MIN_CONFIDENCE", 0.6),
            per_trade_cap_fraction: env_or("PER_TRADE_CAP_FRACTION", 0.10),
            per_symbol_cap_fraction: env_or("PER_SYMBOL_CAP_FRACTION", 0.20),
            lot_step: env_or("LOT_STEP", 1.0),

            sma_short: env_or("SMA_SHORT", 10),
            sma_long: env_or("SMA_LONG", 50),
            rsi_period: env_or("RSI_PERIOD", 14),
            rsi_overbought: env_or("RSI_OVERBOUGHT", 70.0),
            rsi_oversold: env_or("RSI_OVERSOLD", 30.0),
            bb_period: env_or("BB_PERIOD", 20),
            bb_std: env_or("BB_STD", 2.0),

            history_capacity: env_or("HISTORY_CAPACITY", 200),
            tick_interval_min_ms: env_or("TICK_INTERVAL_MIN_MS", 1000),
            tick_interval_max_ms: env_or("TICK_INTERVAL_MAX_MS", 3000),
            volatility_sigma: env_or("VOLATILITY_SIGMA", 0.001),
            evaluation_interval_ms: env_or("EVALUATION_INTERVAL_MS", 5000),
            trade_event_buffer: env_or("TRADE_EVENT_BUFFER", 64),

            sqlite_path: std::env::var("FX_SQLITE_PATH").unwrap_or_else(|_| "./fxsim.sqlite".to_string()),
            persistence_timeout_ms: env_or("PERSISTENCE_TIMEOUT_MS", 2000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
