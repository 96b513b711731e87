pub mod shard;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bucket::{BucketClock, MonthKey};

const DAY_MS: i64 = 86_400_000;

// ─── Public types ────────────────────────────────────────────────

/// The durable representative value of one service for one bucket.
/// `ping_ms == 0` means the service was down for that bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub hour_utc_ms: i64,
    pub ping_ms: u64,
}

/// Snapshots of one service, ascending by bucket start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshots {
    pub service_id: String,
    pub snapshots: Vec<Snapshot>,
}

/// What one retention pass changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub files_removed: usize,
    pub files_rewritten: usize,
    pub entries_dropped: usize,
    pub failures: usize,
}

impl PruneReport {
    pub fn is_noop(&self) -> bool {
        self.files_removed == 0 && self.files_rewritten == 0 && self.entries_dropped == 0
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode shard: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt shard {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

type ShardKey = (String, MonthKey);

/// Sharded per (service, UTC month) snapshot store.
///
/// Every mutation of a shard holds that shard's async lock for the whole
/// load → modify → atomic replace sequence, so concurrent writers to the
/// same shard never interleave. Readers take no lock; the atomic rename
/// guarantees they see a complete file.
pub struct SnapshotStore {
    dir: PathBuf,
    clock: BucketClock,
    locks: Mutex<HashMap<ShardKey, Arc<tokio::sync::Mutex<()>>>>,
}

// ─── SnapshotStore impl ──────────────────────────────────────────

impl SnapshotStore {
    /// Create the data directory if needed and sweep temporary files
    /// left behind by an interrupted write.
    pub async fn open(dir: impl Into<PathBuf>, clock: BucketClock) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                op: "create dir",
                path: dir.clone(),
                source,
            })?;

        let store = Self {
            dir,
            clock,
            locks: Mutex::new(HashMap::new()),
        };
        let swept = store.sweep_temp_files().await?;
        if swept > 0 {
            warn!(count = swept, dir = %store.dir.display(), "removed stale temporary shard files");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn shard_path(&self, service_id: &str, month: MonthKey) -> PathBuf {
        self.dir.join(shard::file_name(service_id, month))
    }

    fn shard_lock(&self, service_id: &str, month: MonthKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry((service_id.to_owned(), month))
            .or_default()
            .clone()
    }

    /// Insert or replace the snapshot for `bucket_start`, keeping the
    /// shard sorted and free of duplicates.
    pub async fn upsert_snapshot(
        &self,
        service_id: &str,
        bucket_start: i64,
        ping_ms: u64,
    ) -> Result<(), StoreError> {
        let month = self.clock.month_key(bucket_start);
        let path = self.shard_path(service_id, month);
        let lock = self.shard_lock(service_id, month);
        let _guard = lock.lock().await;

        let mut entries = match shard::load(&path).await {
            Ok(entries) => entries,
            Err(StoreError::Corrupt { path, source }) => {
                let moved = shard::quarantine(&path).await?;
                error!(
                    shard = %path.display(),
                    quarantined = %moved.display(),
                    error = %source,
                    "corrupt shard moved aside, starting a fresh one"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let entry = Snapshot {
            hour_utc_ms: bucket_start,
            ping_ms,
        };
        match entries.iter_mut().find(|s| s.hour_utc_ms == bucket_start) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        entries.sort_by_key(|s| s.hour_utc_ms);

        shard::write_atomic(&path, &entries).await?;
        debug!(service = service_id, bucket = bucket_start, ping_ms, "snapshot upserted");
        Ok(())
    }

    /// Load a shard for reading. Corrupt content is logged and read as
    /// empty; the file is left in place for inspection.
    async fn load_for_read(&self, service_id: &str, month: MonthKey) -> Result<Vec<Snapshot>, StoreError> {
        match shard::load(&self.shard_path(service_id, month)).await {
            Err(StoreError::Corrupt { path, source }) => {
                error!(shard = %path.display(), error = %source, "corrupt shard read as empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Snapshots with bucket start in `[from, to]` for each service,
    /// ascending, at most `limit` per service. Over the limit the
    /// earliest entries are kept.
    pub async fn read_snapshots(
        &self,
        service_ids: &[String],
        from: i64,
        to: i64,
        limit: usize,
    ) -> Result<Vec<ServiceSnapshots>, StoreError> {
        let months = self.clock.months_between(from, to);
        let mut results = Vec::with_capacity(service_ids.len());

        for id in service_ids {
            let mut snapshots = Vec::new();
            for &month in &months {
                snapshots.extend(
                    self.load_for_read(id, month)
                        .await?
                        .into_iter()
                        .filter(|s| (from..=to).contains(&s.hour_utc_ms)),
                );
            }
            snapshots.sort_by_key(|s| s.hour_utc_ms);
            snapshots.truncate(limit);
            results.push(ServiceSnapshots {
                service_id: id.clone(),
                snapshots,
            });
        }
        Ok(results)
    }

    /// Most recent snapshot with bucket start ≤ `at_or_before`, looking
    /// in that instant's month and the month before it.
    pub async fn get_latest_snapshot(
        &self,
        service_id: &str,
        at_or_before: i64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let month = self.clock.month_key(at_or_before);
        for candidate in [month, month.prev()] {
            let latest = self
                .load_for_read(service_id, candidate)
                .await?
                .into_iter()
                .filter(|s| s.hour_utc_ms <= at_or_before)
                .max_by_key(|s| s.hour_utc_ms);
            if latest.is_some() {
                return Ok(latest);
            }
        }
        Ok(None)
    }

    /// Drop everything older than `now - retention_days`. Whole months
    /// before the cutoff are deleted, the month straddling it is
    /// filtered and rewritten. Running twice with the same cutoff
    /// changes nothing the second time.
    pub async fn prune_retention(&self, retention_days: u32, now: i64) -> Result<PruneReport, StoreError> {
        let cutoff = now - i64::from(retention_days) * DAY_MS;
        let mut report = PruneReport::default();

        for (service_id, month) in self.list_shards().await? {
            if month.start_ms() >= cutoff {
                continue;
            }
            if let Err(e) = self.prune_shard(&service_id, month, cutoff, &mut report).await {
                report.failures += 1;
                error!(service = %service_id, %month, error = %e, "retention pruning failed for shard");
            }
        }

        if !report.is_noop() {
            info!(
                cutoff,
                removed = report.files_removed,
                rewritten = report.files_rewritten,
                dropped = report.entries_dropped,
                "retention pruned"
            );
        }
        Ok(report)
    }

    async fn prune_shard(
        &self,
        service_id: &str,
        month: MonthKey,
        cutoff: i64,
        report: &mut PruneReport,
    ) -> Result<(), StoreError> {
        let path = self.shard_path(service_id, month);
        let lock = self.shard_lock(service_id, month);
        let _guard = lock.lock().await;

        if month.end_ms() <= cutoff {
            shard::remove(&path).await?;
            report.files_removed += 1;
            return Ok(());
        }

        let entries = match shard::load(&path).await {
            Ok(entries) => entries,
            Err(StoreError::Corrupt { path, source }) => {
                let moved = shard::quarantine(&path).await?;
                error!(
                    shard = %path.display(),
                    quarantined = %moved.display(),
                    error = %source,
                    "corrupt shard moved aside during retention"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let before = entries.len();
        let kept: Vec<Snapshot> = entries.into_iter().filter(|s| s.hour_utc_ms >= cutoff).collect();
        if kept.len() == before {
            return Ok(());
        }

        report.entries_dropped += before - kept.len();
        if kept.is_empty() {
            shard::remove(&path).await?;
            report.files_removed += 1;
        } else {
            shard::write_atomic(&path, &kept).await?;
            report.files_rewritten += 1;
        }
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<ShardKey>, StoreError> {
        let mut shards = Vec::new();
        for name in self.file_names().await? {
            if let Some(key) = shard::parse_file_name(&name) {
                shards.push(key);
            }
        }
        shards.sort();
        Ok(shards)
    }

    async fn sweep_temp_files(&self) -> Result<usize, StoreError> {
        let mut swept = 0;
        for name in self.file_names().await? {
            if shard::is_temp_file(&name) {
                shard::remove(&self.dir.join(&name)).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn file_names(&self) -> Result<Vec<String>, StoreError> {
        let io_err = |source| StoreError::Io {
            op: "list",
            path: self.dir.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = BucketClock::HOUR_MS;
    // 2024-03-15T10:00:00Z
    const T: i64 = 1_710_496_800_000;

    async fn store(dir: &Path) -> SnapshotStore {
        SnapshotStore::open(dir, BucketClock::new(HOUR)).await.unwrap()
    }

    fn snap(hour_utc_ms: i64, ping_ms: u64) -> Snapshot {
        Snapshot { hour_utc_ms, ping_ms }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn shard_contents(store: &SnapshotStore, id: &str, month: MonthKey) -> Vec<Snapshot> {
        shard::load(&store.shard_path(id, month)).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;

        store.upsert_snapshot("svc1", T + HOUR, 30).await.unwrap();
        store.upsert_snapshot("svc1", T, 50).await.unwrap();
        store.upsert_snapshot("svc1", T, 50).await.unwrap();
        store.upsert_snapshot("svc1", T, 80).await.unwrap();
        store.upsert_snapshot("svc1", T - HOUR, 10).await.unwrap();

        let month = MonthKey::from_ms(T);
        assert_eq!(
            shard_contents(&store, "svc1", month).await,
            vec![snap(T - HOUR, 10), snap(T, 80), snap(T + HOUR, 30)]
        );
        assert!(dir.path().join("svc1-2024-03.json").exists());
    }

    #[tokio::test]
    async fn concurrent_upserts_to_one_shard_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(dir.path()).await);

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_snapshot("svc1", T + i * HOUR, 100 + i as u64).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let entries = shard_contents(&store, "svc1", MonthKey::from_ms(T)).await;
        assert_eq!(entries.len(), 24);
        assert!(entries.windows(2).all(|w| w[0].hour_utc_ms < w[1].hour_utc_ms));
    }

    #[tokio::test]
    async fn corrupt_shard_is_quarantined_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let path = dir.path().join("svc1-2024-03.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        // read path: empty, file untouched
        let read = store.read_snapshots(&ids(&["svc1"]), T, T, 10).await.unwrap();
        assert!(read[0].snapshots.is_empty());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"not json");

        // write path: moved aside, fresh shard written
        store.upsert_snapshot("svc1", T, 42).await.unwrap();
        assert_eq!(shard_contents(&store, "svc1", MonthKey::from_ms(T)).await, vec![snap(T, 42)]);
        let names = store.file_names().await.unwrap();
        assert!(names.iter().any(|n| n.starts_with("svc1-2024-03.json.corrupt-")));
    }

    #[tokio::test]
    async fn read_spans_months_filters_and_truncates_earliest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let april = MonthKey::new(2024, 4).unwrap().start_ms();

        for h in [-2, -1] {
            store.upsert_snapshot("svc1", april + h * HOUR, 10).await.unwrap();
        }
        for h in [0, 1, 2] {
            store.upsert_snapshot("svc1", april + h * HOUR, 20).await.unwrap();
        }
        store.upsert_snapshot("svc2", april, 5).await.unwrap();

        let all = store
            .read_snapshots(&ids(&["svc1", "svc2", "svc3"]), april - HOUR, april + HOUR, 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].service_id, "svc1");
        assert_eq!(
            all[0].snapshots,
            vec![snap(april - HOUR, 10), snap(april, 20), snap(april + HOUR, 20)]
        );
        assert_eq!(all[1].snapshots, vec![snap(april, 5)]);
        assert!(all[2].snapshots.is_empty());

        let limited = store
            .read_snapshots(&ids(&["svc1"]), april - 2 * HOUR, april + 2 * HOUR, 2)
            .await
            .unwrap();
        assert_eq!(
            limited[0].snapshots,
            vec![snap(april - 2 * HOUR, 10), snap(april - HOUR, 10)]
        );
    }

    #[tokio::test]
    async fn latest_snapshot_falls_back_to_previous_month() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let april = MonthKey::new(2024, 4).unwrap().start_ms();

        assert_eq!(store.get_latest_snapshot("svc1", april).await.unwrap(), None);

        store.upsert_snapshot("svc1", april - 3 * HOUR, 11).await.unwrap();
        store.upsert_snapshot("svc1", april - HOUR, 12).await.unwrap();
        store.upsert_snapshot("svc1", april + 5 * HOUR, 13).await.unwrap();

        assert_eq!(
            store.get_latest_snapshot("svc1", april + HOUR).await.unwrap(),
            Some(snap(april - HOUR, 12))
        );
        assert_eq!(
            store.get_latest_snapshot("svc1", april + 5 * HOUR).await.unwrap(),
            Some(snap(april + 5 * HOUR, 13))
        );
        assert_eq!(
            store.get_latest_snapshot("svc1", april - 2 * HOUR).await.unwrap(),
            Some(snap(april - 3 * HOUR, 11))
        );
    }

    #[tokio::test]
    async fn retention_removes_rewrites_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;

        let jan = MonthKey::new(2024, 1).unwrap();
        let feb = MonthKey::new(2024, 2).unwrap();
        let mar = MonthKey::new(2024, 3).unwrap();

        // cutoff at 2024-02-10T00:00Z
        let cutoff = feb.start_ms() + 9 * 24 * HOUR;
        let now = cutoff + 30 * DAY_MS;

        store.upsert_snapshot("svc1", jan.start_ms(), 1).await.unwrap();
        store.upsert_snapshot("svc1", jan.start_ms() + HOUR, 2).await.unwrap();
        store.upsert_snapshot("svc1", cutoff - HOUR, 3).await.unwrap();
        store.upsert_snapshot("svc1", cutoff, 4).await.unwrap();
        store.upsert_snapshot("svc1", cutoff + HOUR, 5).await.unwrap();
        store.upsert_snapshot("svc1", mar.start_ms(), 6).await.unwrap();
        store.upsert_snapshot("svc2", feb.start_ms(), 7).await.unwrap();

        let report = store.prune_retention(30, now).await.unwrap();
        assert_eq!(report.files_removed, 2); // svc1 January, svc2 February (emptied)
        assert_eq!(report.files_rewritten, 1);
        assert_eq!(report.entries_dropped, 2);
        assert_eq!(report.failures, 0);

        assert!(!store.shard_path("svc1", jan).exists());
        assert!(!store.shard_path("svc2", feb).exists());
        assert_eq!(
            shard_contents(&store, "svc1", feb).await,
            vec![snap(cutoff, 4), snap(cutoff + HOUR, 5)]
        );
        assert_eq!(shard_contents(&store, "svc1", mar).await, vec![snap(mar.start_ms(), 6)]);

        let again = store.prune_retention(30, now).await.unwrap();
        assert!(again.is_noop());
        assert_eq!(shard_contents(&store, "svc1", feb).await.len(), 2);
    }

    #[tokio::test]
    async fn retention_moves_corrupt_straddling_shard_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;

        let feb = MonthKey::new(2024, 2).unwrap();
        let cutoff = feb.start_ms() + 9 * 24 * HOUR;
        let now = cutoff + 30 * DAY_MS;
        tokio::fs::write(store.shard_path("svc1", feb), b"{broken").await.unwrap();

        let report = store.prune_retention(30, now).await.unwrap();
        assert_eq!(report.failures, 0);
        assert!(!store.shard_path("svc1", feb).exists());
        let names = store.file_names().await.unwrap();
        assert!(names.iter().any(|n| n.starts_with("svc1-2024-02.json.corrupt-")));

        // no longer a shard, so later passes stay quiet
        let again = store.prune_retention(30, now).await.unwrap();
        assert_eq!(again, PruneReport::default());
    }

    #[tokio::test]
    async fn open_sweeps_stale_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store(dir.path()).await;
            store.upsert_snapshot("svc1", T, 9).await.unwrap();
            shard::stage(&store.shard_path("svc1", MonthKey::from_ms(T)), &[snap(T, 1)])
                .await
                .unwrap();
            assert_eq!(store.file_names().await.unwrap().len(), 2);
            // stray temporaries are never mistaken for shards
            assert_eq!(store.list_shards().await.unwrap().len(), 1);
        }

        let reopened = store(dir.path()).await;
        assert_eq!(reopened.file_names().await.unwrap(), vec!["svc1-2024-03.json".to_owned()]);
        assert_eq!(
            reopened.read_snapshots(&ids(&["svc1"]), T, T, 1).await.unwrap()[0].snapshots,
            vec![snap(T, 9)]
        );
    }
}
