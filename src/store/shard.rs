//! On-disk shard files.
//!
//! One file per (service id, UTC month) named `<id>-<YYYY>-<MM>.json`,
//! holding an ascending JSON array of `{hour_utc_ms, ping_ms}` records.
//!
//! Writes go to a uniquely named temporary file in the same directory,
//! are fsynced, then renamed over the destination. Readers therefore see
//! either the previous shard or the new one, never a partial file.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::{Snapshot, StoreError};
use crate::bucket::{now_ms, MonthKey};

const SHARD_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";
const CORRUPT_MARKER: &str = ".corrupt-";

// ─── Naming ──────────────────────────────────────────────────────

pub fn file_name(service_id: &str, month: MonthKey) -> String {
    format!("{service_id}-{month}{SHARD_SUFFIX}")
}

/// Inverse of `file_name`. Ids may themselves contain `-`, so the
/// month is split off from the right.
pub fn parse_file_name(name: &str) -> Option<(String, MonthKey)> {
    let stem = name.strip_suffix(SHARD_SUFFIX)?;
    if stem.starts_with('.') {
        return None;
    }
    let mut parts = stem.rsplitn(3, '-');
    let month: u32 = parts.next()?.parse().ok()?;
    let year_str = parts.next()?;
    let id = parts.next()?;
    if id.is_empty() || year_str.len() != 4 {
        return None;
    }
    let month = MonthKey::new(year_str.parse().ok()?, month)?;
    Some((id.to_owned(), month))
}

pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple());
    path.with_file_name(tmp)
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
        op,
        path: path.to_owned(),
        source,
    }
}

// ─── Reading ─────────────────────────────────────────────────────

/// Load a shard. A missing file is an empty shard; an unparsable one
/// is reported as `StoreError::Corrupt` so the caller decides.
pub async fn load(path: &Path) -> Result<Vec<Snapshot>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err("read", path)(e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_owned(),
        source,
    })
}

// ─── Writing ─────────────────────────────────────────────────────

/// Write `entries` to a fresh temporary file next to `path` and fsync
/// it. The destination is untouched until `commit`.
pub async fn stage(path: &Path, entries: &[Snapshot]) -> Result<PathBuf, StoreError> {
    let json = serde_json::to_vec(entries).map_err(StoreError::Encode)?;
    let tmp = temp_path(path);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .await
        .map_err(io_err("create", &tmp))?;

    let written = async {
        file.write_all(&json).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err("write", &tmp)(e));
    }
    Ok(tmp)
}

/// Atomically replace `path` with a staged temporary file.
pub async fn commit(tmp: &Path, path: &Path) -> Result<(), StoreError> {
    if let Err(e) = tokio::fs::rename(tmp, path).await {
        let _ = tokio::fs::remove_file(tmp).await;
        return Err(io_err("rename", path)(e));
    }
    Ok(())
}

pub async fn write_atomic(path: &Path, entries: &[Snapshot]) -> Result<(), StoreError> {
    let tmp = stage(path, entries).await?;
    commit(&tmp, path).await
}

pub async fn remove(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err("remove", path)(e)),
    }
}

/// Move an unparsable shard aside as `<file>.corrupt-<unix_ms>` so the
/// next write does not destroy it.
pub async fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = path.with_file_name(format!("{name}{CORRUPT_MARKER}{}", now_ms()));
    tokio::fs::rename(path, &target)
        .await
        .map_err(io_err("quarantine", path))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(hour_utc_ms: i64, ping_ms: u64) -> Snapshot {
        Snapshot { hour_utc_ms, ping_ms }
    }

    #[test]
    fn file_names_round_trip_with_dashed_ids() {
        let month = MonthKey::new(2024, 3).unwrap();
        let name = file_name("api-eu-west", month);
        assert_eq!(name, "api-eu-west-2024-03.json");
        assert_eq!(parse_file_name(&name), Some(("api-eu-west".to_owned(), month)));
    }

    #[test]
    fn foreign_files_are_not_shards() {
        assert_eq!(parse_file_name("svc-2024-13.json"), None);
        assert_eq!(parse_file_name("svc-24-03.json"), None);
        assert_eq!(parse_file_name("-2024-03.json"), None);
        assert_eq!(parse_file_name("svc-2024-03.json.corrupt-17"), None);
        assert_eq!(parse_file_name(".svc-2024-03.json.ab12.tmp"), None);
        assert!(is_temp_file(".svc-2024-03.json.ab12.tmp"));
        assert!(!is_temp_file("svc-2024-03.json"));
    }

    #[tokio::test]
    async fn missing_shard_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("svc-2024-03.json")).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc-2024-03.json");
        tokio::fs::write(&path, b"[{\"hour_utc_ms\":").await.unwrap();
        assert!(matches!(load(&path).await, Err(StoreError::Corrupt { .. })));

        let moved = quarantine(&path).await.unwrap();
        assert!(!path.exists());
        assert!(moved.exists());
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("svc-2024-03.json.corrupt-"));
    }

    #[tokio::test]
    async fn unreadable_shard_reports_op_and_path() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where a shard file should be
        let path = dir.path().join("svc-2024-03.json");
        tokio::fs::create_dir(&path).await.unwrap();

        match load(&path).await {
            Err(StoreError::Io { op, path: reported, .. }) => {
                assert_eq!(op, "read");
                assert_eq!(reported, path);
            }
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupted_write_leaves_committed_shard_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc-2024-03.json");
        let committed = vec![snap(1_000, 50), snap(2_000, 60)];
        write_atomic(&path, &committed).await.unwrap();

        // Crash after the temporary file is fully written but before
        // the rename: the staged file is simply never committed.
        let staged = stage(&path, &[snap(3_000, 70)]).await.unwrap();
        assert!(staged.exists());
        assert_eq!(staged.parent(), path.parent());

        assert_eq!(load(&path).await.unwrap(), committed);
    }

    #[tokio::test]
    async fn commit_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc-2024-03.json");
        write_atomic(&path, &[snap(1_000, 50)]).await.unwrap();
        write_atomic(&path, &[snap(1_000, 80), snap(2_000, 90)]).await.unwrap();

        assert_eq!(load(&path).await.unwrap(), vec![snap(1_000, 80), snap(2_000, 90)]);
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            raw,
            r#"[{"hour_utc_ms":1000,"ping_ms":80},{"hour_utc_ms":2000,"ping_ms":90}]"#
        );

        // no temporaries left behind
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["svc-2024-03.json".to_owned()]);
    }
}
