use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use slotbook::clock::SystemClock;
use slotbook::compactor;
use slotbook::config::Config;
use slotbook::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    slotbook::observability::init_tracing(&config.logging.level);
    slotbook::observability::init(config.metrics.port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let wal_path = config.storage.wal_path();
    let compact_threshold = config.storage.compact_threshold;

    let config = Arc::new(config);
    let engine = Arc::new(Engine::new(wal_path.clone(), config.clone(), Arc::new(SystemClock))?);

    info!("slotbook started");
    info!("  wal: {}", wal_path.display());
    info!("  compact_threshold: {compact_threshold}");
    info!(
        "  metrics: {}",
        config
            .metrics
            .port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor_engine = engine.clone();
    let compactor = tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, compact_threshold, Duration::from_secs(10)).await;
    });

    // Graceful shutdown on SIGTERM/ctrl-c
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
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("slotbook stopped");
    Ok(())
}
