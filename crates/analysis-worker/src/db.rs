//! Postgres persistence: the job store, game fetching, analysis storage and
//! the snapshot source.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use blunder_core::aggregate::aggregate;
use blunder_core::model::{AnalysisJob, BlunderEvent, JobStatus, MoveInput, MoveRecord, Snapshot};

use crate::error::{QueueError, WorkerError};
use crate::queue::{Coverage, EnqueueReport, JobOutcome, JobStore, SweepReport};
use crate::snapshot::{SnapshotError, SnapshotSource};

/// Apply the full schema, idempotently.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Imported games for tracked players
CREATE TABLE IF NOT EXISTS user_games (
    id               BIGSERIAL PRIMARY KEY,
    user_id          BIGINT NOT NULL,
    moves            JSONB NOT NULL DEFAULT '[]'::jsonb,
    tracked_is_white BOOLEAN NOT NULL DEFAULT TRUE,
    analyzed_at      TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_user_games_user_id ON user_games (user_id);

-- Analysis job queue
CREATE TABLE IF NOT EXISTS analysis_jobs (
    id             BIGSERIAL PRIMARY KEY,
    game_id        BIGINT NOT NULL REFERENCES user_games(id) ON DELETE CASCADE,
    engine_name    TEXT NOT NULL,
    analysis_depth INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    attempts       INTEGER NOT NULL DEFAULT 0,
    last_error     TEXT,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    claimed_at     TIMESTAMPTZ,
    UNIQUE (game_id, engine_name, analysis_depth)
);

CREATE INDEX IF NOT EXISTS idx_analysis_jobs_claim
    ON analysis_jobs (engine_name, analysis_depth, status, created_at);
CREATE INDEX IF NOT EXISTS idx_analysis_jobs_stale
    ON analysis_jobs (status, claimed_at);

-- Per-game analysis output, one row per engine
CREATE TABLE IF NOT EXISTS game_analysis (
    id             BIGSERIAL PRIMARY KEY,
    game_id        BIGINT NOT NULL REFERENCES user_games(id) ON DELETE CASCADE,
    engine_name    TEXT NOT NULL,
    moves          JSONB NOT NULL,
    blunder_events JSONB NOT NULL DEFAULT '[]'::jsonb,
    accuracy       DOUBLE PRECISION,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (game_id, engine_name)
);

-- Last failure reason per game and engine, for operators
CREATE TABLE IF NOT EXISTS analysis_failures (
    id          BIGSERIAL PRIMARY KEY,
    game_id     BIGINT NOT NULL REFERENCES user_games(id) ON DELETE CASCADE,
    engine_name TEXT NOT NULL,
    reason      TEXT NOT NULL,
    failed_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (game_id, engine_name)
);
"#;

type JobRow = (
    i64,
    i64,
    String,
    i32,
    String,
    i32,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn job_from_row(row: JobRow) -> Result<AnalysisJob, QueueError> {
    let status = JobStatus::parse(&row.4)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown job status '{}'", row.4).into()))?;
    Ok(AnalysisJob {
        id: row.0,
        game_id: row.1,
        engine_name: row.2,
        analysis_depth: row.3,
        status,
        attempts: row.5,
        last_error: row.6,
        created_at: row.7,
        updated_at: row.8,
        claimed_at: row.9,
    })
}

/// Job store backed by the `analysis_jobs` table. Claim atomicity comes from
/// `FOR UPDATE SKIP LOCKED`, so any number of workers can poll concurrently.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl JobStore for PgJobStore {
    async fn enqueue(
        &self,
        game_ids: &[i64],
        engine_name: &str,
        analysis_depth: i32,
        limit: usize,
    ) -> Result<EnqueueReport, QueueError> {
        let mut report = EnqueueReport::default();
        for (i, &game_id) in game_ids.iter().enumerate() {
            if i >= limit {
                report.skipped += 1;
                continue;
            }
            // A failed job re-enters the queue; pending/processing/done rows
            // are left alone.
            let result = sqlx::query(
                r#"INSERT INTO analysis_jobs (game_id, engine_name, analysis_depth, status, attempts)
                   VALUES ($1, $2, $3, 'pending', 0)
                   ON CONFLICT (game_id, engine_name, analysis_depth) DO UPDATE
                   SET status = 'pending', attempts = 0, last_error = NULL,
                       claimed_at = NULL, updated_at = NOW()
                   WHERE analysis_jobs.status = 'failed'"#,
            )
            .bind(game_id)
            .bind(engine_name)
            .bind(analysis_depth)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                report.enqueued += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    async fn claim(
        &self,
        engine_name: &str,
        analysis_depth: i32,
    ) -> Result<Option<AnalysisJob>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"UPDATE analysis_jobs
               SET status = 'processing', attempts = attempts + 1,
                   claimed_at = NOW(), updated_at = NOW()
               WHERE id = (
                   SELECT id FROM analysis_jobs
                   WHERE status = 'pending' AND engine_name = $1 AND analysis_depth = $2
                   ORDER BY created_at
                   LIMIT 1
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING id, game_id, engine_name, analysis_depth, status,
                         attempts, last_error, created_at, updated_at, claimed_at"#,
        )
        .bind(engine_name)
        .bind(analysis_depth)
        .fetch_optional(&self.pool)
        .await?;

        row.map(job_from_row).transpose()
    }

    async fn complete(&self, job_id: i64, outcome: JobOutcome) -> Result<(), QueueError> {
        let (status, last_error) = match outcome {
            JobOutcome::Done => (JobStatus::Done, None),
            JobOutcome::Failed { reason } => (JobStatus::Failed, Some(reason)),
        };
        sqlx::query(
            r#"UPDATE analysis_jobs
               SET status = $2, last_error = $3, updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: i32,
    ) -> Result<SweepReport, QueueError> {
        let cutoff = Utc::now() - older_than;

        let requeued = sqlx::query(
            r#"UPDATE analysis_jobs
               SET status = 'pending', claimed_at = NULL, updated_at = NOW()
               WHERE status = 'processing' AND claimed_at < $1 AND attempts < $2"#,
        )
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        let failed = sqlx::query(
            r#"UPDATE analysis_jobs
               SET status = 'failed',
                   last_error = 'stale processing job exceeded max attempts',
                   updated_at = NOW()
               WHERE status = 'processing' AND claimed_at < $1 AND attempts >= $2"#,
        )
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(SweepReport {
            requeued: requeued.rows_affected() as usize,
            failed: failed.rows_affected() as usize,
        })
    }

    async fn coverage(
        &self,
        engine_name: &str,
        analysis_depth: i32,
        stale_after: Duration,
    ) -> Result<Coverage, QueueError> {
        let cutoff = Utc::now() - stale_after;
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE status = 'pending'),
                      COUNT(*) FILTER (WHERE status = 'processing'),
                      COUNT(*) FILTER (WHERE status = 'done'),
                      COUNT(*) FILTER (WHERE status = 'failed'),
                      COUNT(*) FILTER (WHERE status = 'processing' AND claimed_at < $3)
               FROM analysis_jobs
               WHERE engine_name = $1 AND analysis_depth = $2"#,
        )
        .bind(engine_name)
        .bind(analysis_depth)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(Coverage {
            total: row.0,
            pending: row.1,
            processing: row.2,
            done: row.3,
            failed: row.4,
            stale_processing: row.5,
        })
    }
}

/// Game data needed to run one analysis job.
#[derive(Debug)]
pub struct GameForAnalysis {
    pub id: i64,
    pub subject_id: i64,
    pub moves: Vec<MoveInput>,
    pub tracked_is_white: bool,
}

/// Games with no job row yet for this engine/depth, oldest first.
pub async fn games_needing_analysis(
    pool: &PgPool,
    engine_name: &str,
    analysis_depth: i32,
    limit: i64,
) -> Result<Vec<i64>, WorkerError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"SELECT g.id FROM user_games g
           LEFT JOIN analysis_jobs j
               ON j.game_id = g.id AND j.engine_name = $1 AND j.analysis_depth = $2
           WHERE j.id IS NULL
           ORDER BY g.created_at
           LIMIT $3"#,
    )
    .bind(engine_name)
    .bind(analysis_depth)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn fetch_game(pool: &PgPool, game_id: i64) -> Result<GameForAnalysis, WorkerError> {
    let row: Option<(i64, i64, serde_json::Value, bool)> = sqlx::query_as(
        "SELECT id, user_id, moves, tracked_is_white FROM user_games WHERE id = $1",
    )
    .bind(game_id)
    .fetch_optional(pool)
    .await?;

    let (id, subject_id, moves, tracked_is_white) =
        row.ok_or(WorkerError::GameNotFound(game_id))?;
    let moves: Vec<MoveInput> = serde_json::from_value(moves)?;

    Ok(GameForAnalysis {
        id,
        subject_id,
        moves,
        tracked_is_white,
    })
}

/// Store the per-move records and classified events for a finished job.
pub async fn store_analysis(
    pool: &PgPool,
    game_id: i64,
    engine_name: &str,
    records: &[MoveRecord],
    events: &[BlunderEvent],
    accuracy: Option<f64>,
) -> Result<(), WorkerError> {
    let moves = serde_json::to_value(records)?;
    let blunder_events = serde_json::to_value(events)?;

    sqlx::query(
        r#"INSERT INTO game_analysis (game_id, engine_name, moves, blunder_events, accuracy, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
           ON CONFLICT (game_id, engine_name) DO UPDATE
           SET moves = EXCLUDED.moves,
               blunder_events = EXCLUDED.blunder_events,
               accuracy = EXCLUDED.accuracy,
               updated_at = NOW()"#,
    )
    .bind(game_id)
    .bind(engine_name)
    .bind(moves)
    .bind(blunder_events)
    .bind(accuracy)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE user_games SET analyzed_at = NOW() WHERE id = $1")
        .bind(game_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record why a job failed, for later inspection.
pub async fn mark_analysis_failed(
    pool: &PgPool,
    game_id: i64,
    engine_name: &str,
    reason: &str,
) -> Result<(), WorkerError> {
    sqlx::query(
        r#"INSERT INTO analysis_failures (game_id, engine_name, reason, failed_at)
           VALUES ($1, $2, $3, NOW())
           ON CONFLICT (game_id, engine_name) DO UPDATE
           SET reason = EXCLUDED.reason, failed_at = NOW()"#,
    )
    .bind(game_id)
    .bind(engine_name)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Recomputes a subject's snapshot from their stored blunder events.
#[derive(Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_snapshot_err(e: sqlx::Error) -> SnapshotError {
    // SQLSTATE class 53 is insufficient resources; everything else is a
    // plain recompute failure.
    let quota = e
        .as_database_error()
        .and_then(|db| db.code().map(|code| code.starts_with("53")))
        .unwrap_or(false);
    if quota {
        SnapshotError::QuotaExceeded(e.to_string())
    } else {
        SnapshotError::Recompute(e.to_string())
    }
}

impl SnapshotSource for PgSnapshotSource {
    async fn recompute(&self, subject_id: i64) -> Result<Snapshot, SnapshotError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            r#"SELECT a.blunder_events
               FROM game_analysis a
               JOIN user_games g ON g.id = a.game_id
               WHERE g.user_id = $1"#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_snapshot_err)?;

        let games_analyzed = rows.len() as u32;
        let mut events: Vec<BlunderEvent> = Vec::new();
        for (value,) in rows {
            let mut game_events: Vec<BlunderEvent> =
                serde_json::from_value(value).map_err(|e| SnapshotError::Recompute(e.to_string()))?;
            events.append(&mut game_events);
        }

        let now = Utc::now();
        Ok(Snapshot {
            subject_id,
            computed_at: now,
            // The cache stamps the real TTL when it stores the snapshot.
            ttl_expires_at: now,
            games_analyzed,
            blunders_total: events.len() as u32,
            patterns: aggregate(&events, now),
        })
    }
}
