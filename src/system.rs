//! System: wires the Feed Simulator, Tick Bus, Position Ledger, Persistence
//! Store, and Trading Engine into one named container, and owns the
//! shutdown signal shared by every background task. A caller builds one,
//! starts it, and stops it — no free functions reaching into process-wide
//! state.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::Engine;
use crate::feed::FeedSimulator;
use crate::ledger::PositionLedger;
use crate::logging::Metrics;
use crate::registry::SymbolRegistry;
use crate::storage::{PersistenceStore, SqlitePersistence};
use crate::tick::TickBus;

pub struct System {
    pub cfg: Config,
    pub registry: SymbolRegistry,
    pub tick_bus: Arc<TickBus>,
    pub ledger: Arc<PositionLedger>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub engine: Arc<Engine>,
    pub metrics: Arc<Metrics>,
    feed: Arc<FeedSimulator>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl System {
    pub fn build(cfg: Config) -> Result<Self, crate::error::EngineError> {
        let registry = SymbolRegistry::from_symbols(&cfg.symbols)?;
        let metrics = Arc::new(Metrics::default());
        let tick_bus = Arc::new(TickBus::new(&registry, cfg.history_capacity, metrics.clone()));
        let ledger = Arc::new(PositionLedger::new(&cfg.symbols));
        let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::open(&cfg.sqlite_path)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = Arc::new(Engine::new(registry.clone(), tick_bus.clone(), ledger.clone(), persistence.clone(), clock.clone(), cfg.clone(), metrics.clone()));
        let feed = Arc::new(FeedSimulator::new(tick_bus.clone(), clock, registry.clone(), &cfg));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self { cfg, registry, tick_bus, ledger, persistence, engine, metrics, feed, shutdown_tx, shutdown_rx })
    }

    /// Start the engine and spawn the feed-simulator and engine run loops.
    /// Returns their join handles so a caller can await clean shutdown.
    pub fn start(&self, seed: u64) -> Result<(tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>), crate::error::EngineError> {
        self.engine.start()?;

        let engine = self.engine.clone();
        let engine_shutdown = self.shutdown_rx.clone();
        let engine_handle = tokio::spawn(async move {
            engine.run(engine_shutdown).await;
        });

        let rng = StdRng::seed_from_u64(seed);
        let feed_shutdown = self.shutdown_rx.clone();
        let feed = self.feed.clone();
        let feed_handle = tokio::spawn(async move {
            feed.run(rng, feed_shutdown).await;
        });

        Ok((engine_handle, feed_handle))
    }

    pub fn stop(&self) {
        self.engine.stop();
        let _ = self.shutdown_tx.send(true);
    }
}
