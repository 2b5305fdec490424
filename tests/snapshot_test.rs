//! Integration tests for the snapshot cache: TTL behavior, force recompute,
//! and the quota circuit breaker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};

use analysis_worker::snapshot::{SnapshotCache, SnapshotError, SnapshotReply, SnapshotSource};
use blunder_core::model::Snapshot;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Counts recomputes and can be switched into quota-exhausted mode.
#[derive(Clone, Default)]
struct CountingSource {
    calls: Arc<AtomicU32>,
    quota_exhausted: Arc<AtomicBool>,
}

impl CountingSource {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for CountingSource {
    async fn recompute(&self, subject_id: i64) -> Result<Snapshot, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.quota_exhausted.load(Ordering::SeqCst) {
            return Err(SnapshotError::QuotaExceeded(
                "too many connections".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Snapshot {
            subject_id,
            computed_at: now,
            ttl_expires_at: now,
            games_analyzed: 12,
            blunders_total: 7,
            patterns: Vec::new(),
        })
    }
}

fn ready(reply: SnapshotReply) -> Snapshot {
    match reply {
        SnapshotReply::Ready(snapshot) => snapshot,
        SnapshotReply::NotReady { retry_at } => panic!("expected a snapshot, got NotReady until {retry_at}"),
    }
}

// ---------------------------------------------------------------------------
// TTL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_fresh_snapshot_is_served_from_cache() {
    let source = CountingSource::default();
    let cache = SnapshotCache::new(source.clone(), Duration::seconds(300), Duration::seconds(60));

    let first = ready(cache.get_or_compute(1, false).await.unwrap());
    assert_eq!(first.subject_id, 1);
    assert!(first.ttl_expires_at > first.computed_at);

    let second = ready(cache.get_or_compute(1, false).await.unwrap());
    assert_eq!(second.computed_at, first.computed_at);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn an_expired_snapshot_is_recomputed() {
    let source = CountingSource::default();
    // Zero TTL: every read finds the cached entry already expired.
    let cache = SnapshotCache::new(source.clone(), Duration::zero(), Duration::seconds(60));

    ready(cache.get_or_compute(1, false).await.unwrap());
    ready(cache.get_or_compute(1, false).await.unwrap());
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn subjects_are_cached_independently() {
    let source = CountingSource::default();
    let cache = SnapshotCache::new(source.clone(), Duration::seconds(300), Duration::seconds(60));

    ready(cache.get_or_compute(1, false).await.unwrap());
    ready(cache.get_or_compute(2, false).await.unwrap());
    assert_eq!(source.calls(), 2);

    ready(cache.get_or_compute(1, false).await.unwrap());
    ready(cache.get_or_compute(2, false).await.unwrap());
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn force_bypasses_a_fresh_cache_entry() {
    let source = CountingSource::default();
    let cache = SnapshotCache::new(source.clone(), Duration::seconds(300), Duration::seconds(60));

    ready(cache.get_or_compute(1, false).await.unwrap());
    ready(cache.get_or_compute(1, true).await.unwrap());
    assert_eq!(source.calls(), 2);
}

// ---------------------------------------------------------------------------
// Quota circuit breaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quota_exhaustion_opens_the_circuit_for_everyone() {
    let source = CountingSource::default();
    let cache = SnapshotCache::new(source.clone(), Duration::seconds(300), Duration::seconds(60));
    source.quota_exhausted.store(true, Ordering::SeqCst);

    let reply = cache.get_or_compute(1, false).await.unwrap();
    let retry_at = match reply {
        SnapshotReply::NotReady { retry_at } => retry_at,
        SnapshotReply::Ready(_) => panic!("expected NotReady"),
    };
    assert!(retry_at > Utc::now());
    assert_eq!(source.calls(), 1);

    // While the circuit is open no subject reaches the source, not even
    // with force.
    assert!(matches!(
        cache.get_or_compute(2, false).await.unwrap(),
        SnapshotReply::NotReady { .. }
    ));
    assert!(matches!(
        cache.get_or_compute(1, true).await.unwrap(),
        SnapshotReply::NotReady { .. }
    ));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn the_circuit_closes_after_the_cooldown() {
    let source = CountingSource::default();
    // Zero cooldown: the circuit is already closed on the next read.
    let cache = SnapshotCache::new(source.clone(), Duration::seconds(300), Duration::zero());
    source.quota_exhausted.store(true, Ordering::SeqCst);

    assert!(matches!(
        cache.get_or_compute(1, false).await.unwrap(),
        SnapshotReply::NotReady { .. }
    ));

    source.quota_exhausted.store(false, Ordering::SeqCst);
    let snapshot = ready(cache.get_or_compute(1, false).await.unwrap());
    assert_eq!(snapshot.subject_id, 1);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn non_quota_failures_propagate() {
    struct FailingSource;
    impl SnapshotSource for FailingSource {
        async fn recompute(&self, _subject_id: i64) -> Result<Snapshot, SnapshotError> {
            Err(SnapshotError::Recompute("events table corrupt".to_string()))
        }
    }

    let cache = SnapshotCache::new(FailingSource, Duration::seconds(300), Duration::seconds(60));
    let err = cache.get_or_compute(1, false).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Recompute(_)));
}
