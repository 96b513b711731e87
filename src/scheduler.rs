use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::Accumulator;
use crate::bucket::BucketClock;
use crate::store::{SnapshotStore, StoreError};

/// Floor on every sleep so a clock sitting exactly on a boundary
/// cannot spin the loop
const MIN_WAIT: Duration = Duration::from_millis(1);

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("{failed} of {total} snapshot writes failed for bucket {bucket}")]
    Writes { bucket: i64, failed: usize, total: usize },

    #[error("retention pruning failed: {0}")]
    Retention(#[from] StoreError),
}

// ─── Double-fire guard ───────────────────────────────────────────

/// Watermark preventing the same completed bucket from being
/// finalized twice, e.g. after an early timer wake.
#[derive(Debug, Default)]
pub struct FinalizeGuard {
    last_finalized: Option<i64>,
    in_flight: Option<i64>,
}

impl FinalizeGuard {
    /// Claim `bucket` for finalization. False when it is already done
    /// or currently running.
    pub fn begin(&mut self, bucket: i64) -> bool {
        if self.last_finalized == Some(bucket) || self.in_flight == Some(bucket) {
            return false;
        }
        self.in_flight = Some(bucket);
        true
    }

    /// Mark `bucket` finished, whether or not it succeeded.
    pub fn finish(&mut self, bucket: i64) {
        if self.in_flight == Some(bucket) {
            self.in_flight = None;
        }
        self.last_finalized = Some(bucket);
    }

    pub fn last_finalized(&self) -> Option<i64> {
        self.last_finalized
    }
}

// ─── Timeline ────────────────────────────────────────────────────

/// Sleep to each bucket boundary and finalize the bucket that just
/// closed, until `cancel` fires.
///
/// The next boundary is always recomputed from `now()` after a
/// finalization completes, so a finalization that overruns a whole
/// bucket width skips the bucket(s) it overran.
pub async fn run<N, F, Fut>(clock: BucketClock, now: N, mut finalize: F, cancel: CancellationToken)
where
    N: Fn() -> i64,
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<(), FinalizeError>>,
{
    let mut guard = FinalizeGuard::default();

    loop {
        let current = now();
        let boundary = clock.next_boundary(current);
        let wait = Duration::from_millis((boundary - current).max(0) as u64).max(MIN_WAIT);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let completed = boundary - clock.width_ms();
        if !guard.begin(completed) {
            debug!(bucket = completed, "bucket already finalized, rescheduling");
            continue;
        }

        if let Err(e) = finalize(completed).await {
            error!(bucket = completed, error = %e, "finalization failed");
        }
        guard.finish(completed);
    }
    info!(last = ?guard.last_finalized(), "scheduler stopped");
}

// ─── Finalization ────────────────────────────────────────────────

/// Drains a completed bucket into one durable snapshot per service,
/// then enforces retention.
pub struct Finalizer {
    accumulator: Arc<Accumulator>,
    store: Arc<SnapshotStore>,
    service_ids: Vec<String>,
    retention_days: u32,
}

impl Finalizer {
    pub fn new(
        accumulator: Arc<Accumulator>,
        store: Arc<SnapshotStore>,
        service_ids: Vec<String>,
        retention_days: u32,
    ) -> Self {
        Self {
            accumulator,
            store,
            service_ids,
            retention_days,
        }
    }

    pub async fn finalize(&self, bucket: i64, now: i64) -> Result<(), FinalizeError> {
        let drained = self.accumulator.drain_bucket(bucket);

        // Buckets skipped by an overrun would otherwise sit in memory forever
        for stale in self.accumulator.open_buckets().into_iter().filter(|&b| b < bucket) {
            let dropped = self.accumulator.discard_bucket(stale);
            warn!(bucket = stale, services = dropped, "discarded unfinalized bucket");
        }

        let mut failed = 0;
        for id in &self.service_ids {
            let ping = drained.get(id).map(|agg| agg.representative_ping()).unwrap_or(0);
            if let Err(e) = self.store.upsert_snapshot(id, bucket, ping).await {
                failed += 1;
                error!(service = %id, bucket, error = %e, "snapshot write failed");
            }
        }
        info!(bucket, services = self.service_ids.len(), with_data = drained.len(), "bucket finalized");

        let pruned = self.store.prune_retention(self.retention_days, now).await;

        if failed > 0 {
            return Err(FinalizeError::Writes {
                bucket,
                failed,
                total: self.service_ids.len(),
            });
        }
        pruned?;
        Ok(())
    }
}
