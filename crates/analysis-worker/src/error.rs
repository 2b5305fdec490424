//! Worker error taxonomy.

use thiserror::Error;

/// Engine process failures, split by recovery policy: `Unavailable` fails
/// the job immediately, `Timeout` skips the affected move, `Crashed` aborts
/// the job so the requeue path retries with a fresh process.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine produced no evaluation within {0}ms")]
    Timeout(u64),

    #[error("engine crashed: {0}")]
    Crashed(String),
}

/// Job store failures. The in-memory store never produces these.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job store error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("game not found: {0}")]
    GameNotFound(i64),

    #[error("analysis error: {0}")]
    Analysis(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
