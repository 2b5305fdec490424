//! Integration tests for the job queue semantics, run against the in-memory
//! store (which mirrors the Postgres store's contract).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;

use analysis_worker::queue::{JobOutcome, JobStore, MemoryJobStore};
use blunder_core::model::JobStatus;

const ENGINE: &str = "stockfish";
const DEPTH: i32 = 15;

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_is_idempotent_per_game_engine_depth() {
    let store = MemoryJobStore::new();

    let first = store.enqueue(&[1, 2], ENGINE, DEPTH, 100).await.unwrap();
    assert_eq!(first.enqueued, 2);
    assert_eq!(first.skipped, 0);

    let second = store.enqueue(&[1, 2], ENGINE, DEPTH, 100).await.unwrap();
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.skipped, 2);

    // Same games at another depth are distinct jobs.
    let other_depth = store.enqueue(&[1, 2], ENGINE, 20, 100).await.unwrap();
    assert_eq!(other_depth.enqueued, 2);
}

#[tokio::test]
async fn enqueue_respects_the_batch_limit() {
    let store = MemoryJobStore::new();
    let report = store
        .enqueue(&[1, 2, 3, 4, 5], ENGINE, DEPTH, 3)
        .await
        .unwrap();
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.skipped, 2);
}

#[tokio::test]
async fn enqueue_resets_failed_jobs_only() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();

    let job = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    store
        .complete(
            job.id,
            JobOutcome::Failed {
                reason: "engine crashed".to_string(),
            },
        )
        .await
        .unwrap();

    // The failed job re-enters the queue with attempts reset.
    let report = store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    assert_eq!(report.enqueued, 1);

    let retried = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    assert_eq!(retried.id, job.id);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.last_error, None);

    // A processing job is not reset.
    let report = store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.skipped, 1);
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_job() {
    let store = Arc::new(MemoryJobStore::new());
    let game_ids: Vec<i64> = (1..=20).collect();
    store.enqueue(&game_ids, ENGINE, DEPTH, 100).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim(ENGINE, DEPTH).await.unwrap() {
                claimed.push(job.id);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.await.unwrap());
    }

    let unique: HashSet<i64> = all_claims.iter().copied().collect();
    assert_eq!(all_claims.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[tokio::test]
async fn claiming_moves_the_job_to_processing_and_counts_the_attempt() {
    let store = MemoryJobStore::new();
    store.enqueue(&[7], ENGINE, DEPTH, 100).await.unwrap();

    let job = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    assert_eq!(job.game_id, 7);
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.attempts, 1);
    assert!(job.claimed_at.is_some());

    // Nothing else is pending.
    assert!(store.claim(ENGINE, DEPTH).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Staleness sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_claims_survive_the_sweep() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    store.claim(ENGINE, DEPTH).await.unwrap().unwrap();

    let report = store
        .requeue_stale(Duration::seconds(120), 3)
        .await
        .unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn stale_claims_are_requeued_without_touching_attempts() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    store.claim(ENGINE, DEPTH).await.unwrap().unwrap();

    // Zero cutoff: the moment-old claim is already stale.
    let report = store.requeue_stale(Duration::zero(), 3).await.unwrap();
    assert_eq!(report.requeued, 1);

    // Attempts count claims, not sweeps: the re-claim is attempt 2.
    let job = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn a_poison_job_fails_after_max_attempts() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    let max_attempts = 3;

    // The job is claimed and abandoned over and over.
    for _ in 0..max_attempts {
        store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
        store
            .requeue_stale(Duration::zero(), max_attempts)
            .await
            .unwrap();
    }

    // The final sweep failed it rather than requeueing.
    assert!(store.claim(ENGINE, DEPTH).await.unwrap().is_none());
    let coverage = store
        .coverage(ENGINE, DEPTH, Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(coverage.failed, 1);

    // Re-enqueueing gives the failed job a fresh run.
    let report = store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    assert_eq!(report.enqueued, 1);
    let job = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
}

// ---------------------------------------------------------------------------
// Completion and coverage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_records_the_outcome() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1, 2], ENGINE, DEPTH, 100).await.unwrap();

    let first = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    store.complete(first.id, JobOutcome::Done).await.unwrap();

    let second = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();
    store
        .complete(
            second.id,
            JobOutcome::Failed {
                reason: "illegal move 'Qd9' at ply 3".to_string(),
            },
        )
        .await
        .unwrap();

    let coverage = store
        .coverage(ENGINE, DEPTH, Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(coverage.total, 2);
    assert_eq!(coverage.done, 1);
    assert_eq!(coverage.failed, 1);
    assert_eq!(coverage.pending, 0);
    assert_eq!(coverage.processing, 0);
}

#[tokio::test]
async fn completing_a_swept_job_is_a_no_op() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1], ENGINE, DEPTH, 100).await.unwrap();
    let job = store.claim(ENGINE, DEPTH).await.unwrap().unwrap();

    // Sweeper rescued it before the (slow) worker reported back.
    store.requeue_stale(Duration::zero(), 3).await.unwrap();
    store.complete(job.id, JobOutcome::Done).await.unwrap();

    // Still pending: the late completion did not clobber the requeue.
    let coverage = store
        .coverage(ENGINE, DEPTH, Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(coverage.pending, 1);
    assert_eq!(coverage.done, 0);
}

#[tokio::test]
async fn coverage_reports_stale_processing_jobs() {
    let store = MemoryJobStore::new();
    store.enqueue(&[1, 2, 3], ENGINE, DEPTH, 100).await.unwrap();
    store.claim(ENGINE, DEPTH).await.unwrap().unwrap();

    let fresh = store
        .coverage(ENGINE, DEPTH, Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(fresh.processing, 1);
    assert_eq!(fresh.stale_processing, 0);

    let stale = store.coverage(ENGINE, DEPTH, Duration::zero()).await.unwrap();
    assert_eq!(stale.processing, 1);
    assert_eq!(stale.stale_processing, 1);
    assert_eq!(stale.pending, 2);
}
