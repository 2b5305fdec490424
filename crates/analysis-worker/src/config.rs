//! Worker configuration from environment variables.

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub engine_path: String,
    pub engine_name: String,
    pub analysis_depth: i32,
    /// Engine search budget per position.
    pub movetime_ms: u64,
    /// Clock reading below which a move counts as time pressure.
    pub low_time_threshold_ms: u32,
    pub num_workers: usize,
    /// Worker sleep between claim attempts when the queue is empty.
    pub idle_poll_ms: u64,
    pub feeder_interval_secs: u64,
    /// Max games enqueued per feeder pass.
    pub enqueue_batch: usize,
    pub sweep_interval_secs: u64,
    /// Age at which a processing claim is considered abandoned.
    pub stale_after_secs: i64,
    pub max_attempts: i32,
    pub snapshot_ttl_secs: i64,
    pub snapshot_cooldown_secs: i64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| WorkerError::Config("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            engine_path: std::env::var("ENGINE_PATH")
                .unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string()),
            engine_name: std::env::var("ENGINE_NAME").unwrap_or_else(|_| "stockfish".to_string()),
            analysis_depth: env_parse("ANALYSIS_DEPTH", 15),
            movetime_ms: env_parse("MOVETIME_MS", 100),
            low_time_threshold_ms: env_parse("LOW_TIME_THRESHOLD_MS", 10_000),
            num_workers: env_parse("NUM_WORKERS", num_cpus::get()),
            idle_poll_ms: env_parse("IDLE_POLL_MS", 1_000),
            feeder_interval_secs: env_parse("FEEDER_INTERVAL_SECS", 30),
            enqueue_batch: env_parse("ENQUEUE_BATCH", 100),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
            stale_after_secs: env_parse("STALE_AFTER_SECS", 120),
            max_attempts: env_parse("MAX_ATTEMPTS", 3),
            snapshot_ttl_secs: env_parse("SNAPSHOT_TTL_SECS", 300),
            snapshot_cooldown_secs: env_parse("SNAPSHOT_COOLDOWN_SECS", 60),
        })
    }
}
