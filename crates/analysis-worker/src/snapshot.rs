//! Snapshot cache with TTL and a quota circuit breaker.
//!
//! Snapshots are cached per subject and served until their TTL expires.
//! Recomputation happens outside the cache lock, so two callers racing past
//! an expired entry may both recompute; the cache only ever serves one
//! result. When the source signals resource exhaustion the whole cache
//! opens a cooldown circuit and answers `NotReady` instead of hammering it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use blunder_core::model::Snapshot;

#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The backing store refused the recompute for capacity reasons.
    #[error("snapshot quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("snapshot recompute failed: {0}")]
    Recompute(String),
}

/// Where fresh snapshots come from. The worker wires this to the database;
/// tests script it.
#[allow(async_fn_in_trait)]
pub trait SnapshotSource {
    async fn recompute(&self, subject_id: i64) -> Result<Snapshot, SnapshotError>;
}

#[derive(Debug, Clone)]
pub enum SnapshotReply {
    Ready(Snapshot),
    /// The circuit is open; callers should retry after `retry_at`.
    NotReady { retry_at: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct CacheState {
    by_subject: HashMap<i64, Snapshot>,
    circuit_open_until: Option<DateTime<Utc>>,
}

pub struct SnapshotCache<S> {
    source: S,
    ttl: Duration,
    cooldown: Duration,
    state: Mutex<CacheState>,
}

impl<S: SnapshotSource> SnapshotCache<S> {
    pub fn new(source: S, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            source,
            ttl,
            cooldown,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Serve the cached snapshot if fresh, otherwise recompute it.
    /// `force` bypasses the TTL check but not an open circuit.
    pub async fn get_or_compute(
        &self,
        subject_id: i64,
        force: bool,
    ) -> Result<SnapshotReply, SnapshotError> {
        let now = Utc::now();
        {
            let state = self.state.lock().await;
            if let Some(until) = state.circuit_open_until {
                if now < until {
                    return Ok(SnapshotReply::NotReady { retry_at: until });
                }
            }
            if !force {
                if let Some(cached) = state.by_subject.get(&subject_id) {
                    if now < cached.ttl_expires_at {
                        return Ok(SnapshotReply::Ready(cached.clone()));
                    }
                }
            }
        }

        match self.source.recompute(subject_id).await {
            Ok(mut snapshot) => {
                snapshot.ttl_expires_at = Utc::now() + self.ttl;
                let mut state = self.state.lock().await;
                state.circuit_open_until = None;
                state.by_subject.insert(subject_id, snapshot.clone());
                Ok(SnapshotReply::Ready(snapshot))
            }
            Err(SnapshotError::QuotaExceeded(reason)) => {
                let retry_at = Utc::now() + self.cooldown;
                warn!(subject_id, %reason, "snapshot quota exceeded, opening circuit");
                let mut state = self.state.lock().await;
                state.circuit_open_until = Some(retry_at);
                Ok(SnapshotReply::NotReady { retry_at })
            }
            Err(e) => Err(e),
        }
    }
}
