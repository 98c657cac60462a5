use fxsim::config::Config;
use fxsim::system::System;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    let system = System::build(cfg)?;

    let seed = std::env::var("FEED_SEED").ok().and_then(|v| v.parse().ok()).unwrap_or_else(|| std::process::id() as u64);
    let (engine_handle, feed_handle) = system.start(seed)?;

    tokio::signal::ctrl_c().await?;
    system.stop();

    let _ = engine_handle.await;
    let _ = feed_handle.await;
    Ok(())
}
