//! Analysis worker binary.
//!
//! Runs a pool of engine-backed workers over the database job queue, plus a
//! feeder that enqueues unanalyzed games and a sweeper that rescues stale
//! claims. `--coverage` prints the queue depth as JSON and exits.

use std::sync::Arc;

use tracing::info;

use analysis_worker::config::WorkerConfig;
use analysis_worker::db::{PgJobStore, PgSnapshotSource};
use analysis_worker::queue::JobStore;
use analysis_worker::snapshot::SnapshotCache;
use analysis_worker::worker::{run_feeder, run_sweeper, run_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let config = WorkerConfig::from_env()?;
    info!(
        engine_path = %config.engine_path,
        engine_name = %config.engine_name,
        analysis_depth = config.analysis_depth,
        movetime_ms = config.movetime_ms,
        "worker config loaded"
    );

    let pool_size = (config.num_workers + 2) as u32; // headroom for overlapping saves
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(pool_size)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .idle_timeout(std::time::Duration::from_secs(300))
        .connect(&config.database_url)
        .await?;
    info!(pool_size, "database connection pool established");

    analysis_worker::db::run_migrations(&pool).await?;

    let store = PgJobStore::new(pool.clone());

    // One-shot coverage report for operators.
    if std::env::args().any(|arg| arg == "--coverage") {
        let coverage = store
            .coverage(
                &config.engine_name,
                config.analysis_depth,
                chrono::Duration::seconds(config.stale_after_secs),
            )
            .await?;
        println!("{}", serde_json::to_string_pretty(&coverage)?);
        return Ok(());
    }

    let snapshots = Arc::new(SnapshotCache::new(
        PgSnapshotSource::new(pool.clone()),
        chrono::Duration::seconds(config.snapshot_ttl_secs),
        chrono::Duration::seconds(config.snapshot_cooldown_secs),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut handles = Vec::new();
    for worker_id in 0..config.num_workers {
        handles.push(tokio::spawn(run_worker(
            worker_id,
            config.clone(),
            pool.clone(),
            store.clone(),
            snapshots.clone(),
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(run_feeder(
        config.clone(),
        pool.clone(),
        store.clone(),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(run_sweeper(
        config.clone(),
        store.clone(),
        shutdown_rx.clone(),
    )));
    info!(num_workers = config.num_workers, "analysis workers running");

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received ctrl-c, shutting down");
    }

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    info!("shutdown complete");

    Ok(())
}
