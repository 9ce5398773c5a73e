use std::sync::Arc;

use tracing::info;

use deskbook::catalog::StaticCatalog;
use deskbook::clock::SystemClock;
use deskbook::config::Config;
use deskbook::engine::Engine;
use deskbook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    deskbook::observability::init(config.metrics_port)?;

    // Any failure from here to the first sweep aborts startup: without a
    // readable ledger and catalog, conflict-freedom cannot be guaranteed.
    std::fs::create_dir_all(&config.data_dir)?;
    let catalog = Arc::new(StaticCatalog::load(&config.catalog_path)?);
    let engine = Arc::new(Engine::new(config.wal_path(), catalog, Arc::new(SystemClock))?);
    let added = engine.sync_catalog().await?;
    engine.sweep_completions().await?;

    info!("deskbook engine ready");
    info!("  wal: {}", config.wal_path().display());
    info!("  catalog: {} ({added} new units)", config.catalog_path.display());
    info!("  resources: {}", engine.resource_count());
    info!("  reservations: {}", engine.reservation_count());
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    // Run until SIGTERM/ctrl-c
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

    info!("shutdown signal received, stopping background tasks");
    sweeper.abort();
    compactor.abort();
    engine.close().await?;
    info!("deskbook stopped");
    Ok(())
}
