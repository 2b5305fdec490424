//! Analysis job queue contract and the in-memory store.
//!
//! Jobs are keyed by `(game_id, engine_name, analysis_depth)`. The store
//! enforces one live job per key: enqueueing an existing pending, processing
//! or done job is a no-op, a failed job is reset to pending. Claims are
//! atomic so concurrent workers never process the same job twice.

use std::sync::Mutex;

use chrono::{Duration, Utc};
use serde::Serialize;

use blunder_core::model::{AnalysisJob, JobStatus};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub enqueued: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
}

/// Queue depth by status, for the coverage report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    /// Processing jobs whose claim is older than the staleness cutoff.
    pub stale_processing: i64,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Done,
    Failed { reason: String },
}

/// Storage behind the job queue. The worker binary uses the Postgres-backed
/// implementation; tests drive the in-memory one.
#[allow(async_fn_in_trait)]
pub trait JobStore {
    /// Enqueue analysis jobs for `game_ids`, at most `limit` of them.
    /// Candidates beyond the limit count as skipped.
    async fn enqueue(
        &self,
        game_ids: &[i64],
        engine_name: &str,
        analysis_depth: i32,
        limit: usize,
    ) -> Result<EnqueueReport, QueueError>;

    /// Atomically claim the oldest pending job for this engine/depth.
    /// Claiming moves the job to processing and increments `attempts`.
    async fn claim(
        &self,
        engine_name: &str,
        analysis_depth: i32,
    ) -> Result<Option<AnalysisJob>, QueueError>;

    /// Record the outcome of a claimed job. A job no longer in processing
    /// (e.g. swept stale in the meantime) is left untouched.
    async fn complete(&self, job_id: i64, outcome: JobOutcome) -> Result<(), QueueError>;

    /// Requeue processing jobs claimed more than `older_than` ago, or fail
    /// them once `attempts` has reached `max_attempts`.
    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: i32,
    ) -> Result<SweepReport, QueueError>;

    /// Queue depth per status for this engine/depth.
    async fn coverage(
        &self,
        engine_name: &str,
        analysis_depth: i32,
        stale_after: Duration,
    ) -> Result<Coverage, QueueError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    jobs: Vec<AnalysisJob>,
}

/// Mutex-backed store with the same semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JobStore for MemoryJobStore {
    async fn enqueue(
        &self,
        game_ids: &[i64],
        engine_name: &str,
        analysis_depth: i32,
        limit: usize,
    ) -> Result<EnqueueReport, QueueError> {
        let mut inner = self.lock();
        let mut report = EnqueueReport::default();
        let now = Utc::now();

        for (i, &game_id) in game_ids.iter().enumerate() {
            if i >= limit {
                report.skipped += 1;
                continue;
            }
            let existing = inner.jobs.iter().position(|j| {
                j.game_id == game_id
                    && j.engine_name == engine_name
                    && j.analysis_depth == analysis_depth
            });
            match existing {
                None => {
                    inner.next_id += 1;
                    let id = inner.next_id;
                    inner.jobs.push(AnalysisJob {
                        id,
                        game_id,
                        engine_name: engine_name.to_string(),
                        analysis_depth,
                        status: JobStatus::Pending,
                        attempts: 0,
                        last_error: None,
                        created_at: now,
                        updated_at: now,
                        claimed_at: None,
                    });
                    report.enqueued += 1;
                }
                Some(idx) => {
                    let job = &mut inner.jobs[idx];
                    if job.status == JobStatus::Failed {
                        job.status = JobStatus::Pending;
                        job.attempts = 0;
                        job.last_error = None;
                        job.claimed_at = None;
                        job.updated_at = now;
                        report.enqueued += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn claim(
        &self,
        engine_name: &str,
        analysis_depth: i32,
    ) -> Result<Option<AnalysisJob>, QueueError> {
        let mut inner = self.lock();
        let job = inner.jobs.iter_mut().find(|j| {
            j.status == JobStatus::Pending
                && j.engine_name == engine_name
                && j.analysis_depth == analysis_depth
        });
        Ok(job.map(|job| {
            let now = Utc::now();
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.claimed_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete(&self, job_id: i64, outcome: JobOutcome) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if let Some(job) = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
        {
            job.updated_at = Utc::now();
            match outcome {
                JobOutcome::Done => {
                    job.status = JobStatus::Done;
                    job.last_error = None;
                }
                JobOutcome::Failed { reason } => {
                    job.status = JobStatus::Failed;
                    job.last_error = Some(reason);
                }
            }
        }
        Ok(())
    }

    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: i32,
    ) -> Result<SweepReport, QueueError> {
        let mut inner = self.lock();
        let mut report = SweepReport::default();
        let now = Utc::now();
        let cutoff = now - older_than;

        for job in inner.jobs.iter_mut() {
            if job.status != JobStatus::Processing {
                continue;
            }
            let stale = matches!(job.claimed_at, Some(at) if at < cutoff);
            if !stale {
                continue;
            }
            job.updated_at = now;
            if job.attempts < max_attempts {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                report.requeued += 1;
            } else {
                job.status = JobStatus::Failed;
                job.last_error = Some("stale processing job exceeded max attempts".to_string());
                report.failed += 1;
            }
        }
        Ok(report)
    }

    async fn coverage(
        &self,
        engine_name: &str,
        analysis_depth: i32,
        stale_after: Duration,
    ) -> Result<Coverage, QueueError> {
        let inner = self.lock();
        let cutoff = Utc::now() - stale_after;
        let mut coverage = Coverage::default();

        for job in inner
            .jobs
            .iter()
            .filter(|j| j.engine_name == engine_name && j.analysis_depth == analysis_depth)
        {
            coverage.total += 1;
            match job.status {
                JobStatus::Pending => coverage.pending += 1,
                JobStatus::Processing => {
                    coverage.processing += 1;
                    if matches!(job.claimed_at, Some(at) if at < cutoff) {
                        coverage.stale_processing += 1;
                    }
                }
                JobStatus::Done => coverage.done += 1,
                JobStatus::Failed => coverage.failed += 1,
            }
        }
        Ok(coverage)
    }
}
