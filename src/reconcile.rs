use crate::aggregate::Accumulator;
use crate::store::{ServiceSnapshots, Snapshot, SnapshotStore, StoreError};

/// Synthetic snapshot for the still-open bucket, built from the live
/// aggregate with the fast-down override. Never persisted.
pub fn live_snapshot(accumulator: &Accumulator, service_id: &str, now: i64) -> Option<Snapshot> {
    let bucket = accumulator.clock().bucket_start(now);
    accumulator
        .peek_bucket(service_id, bucket)
        .map(|agg| Snapshot {
            hour_utc_ms: bucket,
            ping_ms: agg.live_ping(),
        })
}

/// Finalized history for `[from, to]` blended with the open bucket.
///
/// When the open bucket falls inside the range and has no finalized
/// entry yet, its live value is appended. The per-service `limit`
/// applies to the blended list, keeping the earliest entries.
pub async fn read_range(
    store: &SnapshotStore,
    accumulator: &Accumulator,
    service_ids: &[String],
    from: i64,
    to: i64,
    limit: usize,
    now: i64,
) -> Result<Vec<ServiceSnapshots>, StoreError> {
    let mut results = store.read_snapshots(service_ids, from, to, limit).await?;
    let open_bucket = accumulator.clock().bucket_start(now);

    if !(from..=to).contains(&open_bucket) {
        return Ok(results);
    }

    for entry in &mut results {
        let finalized = entry
            .snapshots
            .iter()
            .any(|s| s.hour_utc_ms == open_bucket);
        if finalized {
            continue;
        }
        if let Some(live) = live_snapshot(accumulator, &entry.service_id, now) {
            entry.snapshots.push(live);
            entry.snapshots.sort_by_key(|s| s.hour_utc_ms);
            entry.snapshots.truncate(limit);
        }
    }
    Ok(results)
}
