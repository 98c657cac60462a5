//! Feed Simulator: generates a synthetic tick stream per symbol by a
//! random-walk on mid price, with occasional injected news shocks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::clock::Clock;
use crate::config::Config;
use crate::registry::SymbolRegistry;
use crate::tick::{TickBus, TickInput};

/// A one-off shock applied to a symbol's mid price on the next tick.
#[derive(Debug, Clone, Copy)]
pub struct NewsImpact {
    pub symbol_index: usize,
    pub magnitude_pct: f64,
}

pub(crate) struct SymbolWalk {
    mid: f64,
    half_spread: f64,
}

/// Drives the synthetic tick generation loop for every registered symbol.
pub struct FeedSimulator {
    bus: Arc<TickBus>,
    clock: Arc<dyn Clock>,
    registry: SymbolRegistry,
    sigma: f64,
    tick_interval_min_ms: u64,
    tick_interval_max_ms: u64,
}

impl FeedSimulator {
    pub fn new(bus: Arc<TickBus>, clock: Arc<dyn Clock>, registry: SymbolRegistry, cfg: &Config) -> Self {
        Self {
            bus,
            clock,
            registry,
            sigma: cfg.volatility_sigma,
            tick_interval_min_ms: cfg.tick_interval_min_ms,
            tick_interval_max_ms: cfg.tick_interval_max_ms,
        }
    }

    fn init_walks(&self) -> Vec<(String, SymbolWalk)> {
        self.registry
            .symbols()
            .map(|s| {
                let spec = self.registry.lookup(s).expect("symbol from own registry");
                (s.clone(), SymbolWalk { mid: spec.base_price, half_spread: spec.typical_spread / 2.0 })
            })
            .collect()
    }

    /// Advance every symbol's random walk by one step, publish a tick for
    /// each, and return the generated ticks' mids for observability.
    pub fn step(&self, walks: &mut [(String, SymbolWalk)], rng: &mut StdRng) -> Vec<(String, f64)> {
        let normal = Normal::new(0.0, self.sigma).expect("sigma must be finite and positive");
        let mut out = Vec::with_capacity(walks.len());
        for (symbol, walk) in walks.iter_mut() {
            let shock = normal.sample(rng);
            walk.mid *= 1.0 + shock;
            if walk.mid <= walk.half_spread {
                walk.mid = walk.half_spread * 2.0;
            }
            let bid = walk.mid - walk.half_spread;
            let ask = walk.mid + walk.half_spread;
            let volume = rng.gen_range(10_000.0..500_000.0);
            let input = TickInput { bid, ask, volume, event_time: self.clock.now_wall() };
            if self.bus.publish(symbol, input).is_ok() {
                out.push((symbol.clone(), walk.mid));
            }
        }
        out
    }

    /// Apply a news shock directly to a symbol's mid, bypassing the normal
    /// random-walk step for this tick only.
    pub fn apply_news(&self, walks: &mut [(String, SymbolWalk)], impact: NewsImpact) {
        if let Some((_, walk)) = walks.get_mut(impact.symbol_index) {
            walk.mid *= 1.0 + impact.magnitude_pct;
        }
    }

    /// Run the generator loop until `shutdown` resolves. Each iteration
    /// sleeps a random duration in the configured interval range, then steps
    /// every symbol once.
    pub async fn run(&self, mut rng: StdRng, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut walks = self.init_walks();
        loop {
            let wait_ms = if self.tick_interval_max_ms > self.tick_interval_min_ms {
                rng.gen_range(self.tick_interval_min_ms..self.tick_interval_max_ms)
            } else {
                self.tick_interval_min_ms
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {
                    self.step(&mut walks, &mut rng);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Derive a deterministic seed from a string key (backtest request id, run
/// label) using a stable FNV-1a hash, so the same key always reproduces the
/// same synthetic path.
pub fn seed_from_key(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn now_seed_label() -> String {
    Utc::now().format("%Y%m%dT%H%M%S").to_string()
}
