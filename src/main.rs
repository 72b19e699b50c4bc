use std::sync::Arc;

use tracing::info;

use skillswap::clock::SystemClock;
use skillswap::config::Config;
use skillswap::directory::InMemoryUserDirectory;
use skillswap::engine::{Engine, EngineOptions};
use skillswap::notify::NotifyHub;
use skillswap::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    skillswap::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    // Standalone host: every account holder in the journal is a known user.
    let users = Arc::new(InMemoryUserDirectory::new());
    let engine = Arc::new(Engine::with_options(
        config.journal_path(),
        Arc::new(NotifyHub::new()),
        users.clone(),
        EngineOptions {
            lock_timeout: config.lock_timeout,
            clock: Arc::new(SystemClock),
        },
    )?);
    for owner in engine.account_owners() {
        users.register(owner);
    }

    info!("skillswapd started");
    info!("  journal: {}", config.journal_path().display());
    info!("  accounts: {}", users.len());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  expiry_interval: {:?}", config.expiry_interval);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let expirer = tokio::spawn(reaper::run_expirer(engine.clone(), config.expiry_interval));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    expirer.abort();
    compactor.abort();
    if let Err(e) = engine.compact_journal().await {
        tracing::warn!("final compaction skipped: {e}");
    }
    info!("skillswapd stopped");
    Ok(())
}
