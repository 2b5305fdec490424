//! Worker, feeder and sweeper loops.
//!
//! Each worker owns one engine process and polls the job store. Engines are
//! started lazily and restarted after a crash; a worker that cannot start
//! its engine fails the claimed job rather than stalling the queue.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use blunder_core::classify::classify;
use blunder_core::model::{AnalysisJob, BlunderEvent, MoveRecord};
use blunder_core::score::accuracy_for_losses;

use crate::config::WorkerConfig;
use crate::db::{self, PgJobStore, PgSnapshotSource};
use crate::engine::{EngineState, UciEngine};
use crate::error::WorkerError;
use crate::evaluator::{analyze_game, EvalOptions};
use crate::queue::{JobOutcome, JobStore};
use crate::snapshot::SnapshotCache;

struct JobSummary {
    subject_id: i64,
    moves_evaluated: usize,
    blunders: usize,
    accuracy: Option<f64>,
}

async fn process_job(
    engine: &mut UciEngine,
    pool: &PgPool,
    config: &WorkerConfig,
    job: &AnalysisJob,
) -> Result<JobSummary, WorkerError> {
    let game = db::fetch_game(pool, job.game_id).await?;
    let opts = EvalOptions {
        movetime_ms: config.movetime_ms,
        low_time_threshold_ms: config.low_time_threshold_ms,
    };

    let evaluated = analyze_game(engine, &game.moves, game.tracked_is_white, opts).await?;
    let records: Vec<MoveRecord> = evaluated.iter().map(|e| e.record.clone()).collect();
    let events: Vec<BlunderEvent> = evaluated
        .iter()
        .filter_map(|e| classify(game.id, &e.record, &e.facts))
        .collect();

    let losses: Vec<i32> = records.iter().map(|r| r.centipawn_loss).collect();
    let accuracy = accuracy_for_losses(&losses);

    db::store_analysis(pool, game.id, &config.engine_name, &records, &events, accuracy).await?;

    Ok(JobSummary {
        subject_id: game.subject_id,
        moves_evaluated: records.len(),
        blunders: events.len(),
        accuracy,
    })
}

pub async fn run_worker(
    worker_id: usize,
    config: WorkerConfig,
    pool: PgPool,
    store: PgJobStore,
    snapshots: Arc<SnapshotCache<PgSnapshotSource>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id, "worker started");
    let mut engine: Option<UciEngine> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = match store.claim(&config.engine_name, config.analysis_depth).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(config.idle_poll_ms)) => {}
                }
                continue;
            }
            Err(e) => {
                error!(worker_id, error = %e, "failed to claim a job");
                tokio::time::sleep(Duration::from_millis(config.idle_poll_ms)).await;
                continue;
            }
        };

        if engine
            .as_ref()
            .map_or(true, |e| e.state() == EngineState::Crashed)
        {
            match UciEngine::start(&config.engine_path).await {
                Ok(started) => engine = Some(started),
                Err(e) => {
                    let reason = e.to_string();
                    warn!(worker_id, job_id = job.id, error = %reason, "engine unavailable");
                    if let Err(e) =
                        db::mark_analysis_failed(&pool, job.game_id, &config.engine_name, &reason)
                            .await
                    {
                        error!(worker_id, job_id = job.id, error = %e, "failed to record failure");
                    }
                    if let Err(e) = store.complete(job.id, JobOutcome::Failed { reason }).await {
                        error!(worker_id, job_id = job.id, error = %e, "failed to complete job");
                    }
                    continue;
                }
            }
        }
        let Some(running) = engine.as_mut() else {
            continue;
        };

        match process_job(running, &pool, &config, &job).await {
            Ok(summary) => {
                info!(
                    worker_id,
                    job_id = job.id,
                    game_id = job.game_id,
                    moves_evaluated = summary.moves_evaluated,
                    blunders = summary.blunders,
                    accuracy = ?summary.accuracy,
                    "job done"
                );
                if let Err(e) = store.complete(job.id, JobOutcome::Done).await {
                    error!(worker_id, job_id = job.id, error = %e, "failed to complete job");
                }
                // Keep the subject's snapshot warm now that new events exist.
                if let Err(e) = snapshots.get_or_compute(summary.subject_id, true).await {
                    warn!(
                        worker_id,
                        subject_id = summary.subject_id,
                        error = %e,
                        "snapshot refresh failed"
                    );
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(worker_id, job_id = job.id, game_id = job.game_id, error = %reason, "job failed");
                if let Err(e) =
                    db::mark_analysis_failed(&pool, job.game_id, &config.engine_name, &reason)
                        .await
                {
                    error!(worker_id, job_id = job.id, error = %e, "failed to record failure");
                }
                if let Err(e) = store.complete(job.id, JobOutcome::Failed { reason }).await {
                    error!(worker_id, job_id = job.id, error = %e, "failed to complete job");
                }
            }
        }
    }

    if let Some(mut running) = engine {
        running.quit().await;
    }
    info!(worker_id, "worker stopped");
}

/// Periodically enqueue games that have no job row yet.
pub async fn run_feeder(
    config: WorkerConfig,
    pool: PgPool,
    store: PgJobStore,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("feeder started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match db::games_needing_analysis(
            &pool,
            &config.engine_name,
            config.analysis_depth,
            config.enqueue_batch as i64,
        )
        .await
        {
            Ok(game_ids) if !game_ids.is_empty() => {
                match store
                    .enqueue(
                        &game_ids,
                        &config.engine_name,
                        config.analysis_depth,
                        config.enqueue_batch,
                    )
                    .await
                {
                    Ok(report) => {
                        info!(
                            enqueued = report.enqueued,
                            skipped = report.skipped,
                            "feeder pass"
                        );
                    }
                    Err(e) => error!(error = %e, "failed to enqueue games"),
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to list games needing analysis"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(config.feeder_interval_secs)) => {}
        }
    }
    info!("feeder stopped");
}

/// Periodically requeue or fail stale processing jobs and log queue depth.
pub async fn run_sweeper(config: WorkerConfig, store: PgJobStore, mut shutdown: watch::Receiver<bool>) {
    info!("sweeper started");
    let stale_after = chrono::Duration::seconds(config.stale_after_secs);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match store.requeue_stale(stale_after, config.max_attempts).await {
            Ok(report) if report.requeued > 0 || report.failed > 0 => {
                warn!(
                    requeued = report.requeued,
                    failed = report.failed,
                    "stale jobs swept"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "stale sweep failed"),
        }

        match store
            .coverage(&config.engine_name, config.analysis_depth, stale_after)
            .await
        {
            Ok(coverage) => {
                info!(
                    total = coverage.total,
                    pending = coverage.pending,
                    processing = coverage.processing,
                    done = coverage.done,
                    failed = coverage.failed,
                    stale_processing = coverage.stale_processing,
                    "queue coverage"
                );
            }
            Err(e) => error!(error = %e, "coverage query failed"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(config.sweep_interval_secs)) => {}
        }
    }
    info!("sweeper stopped");
}
