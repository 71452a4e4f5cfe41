use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::StoreError;
use crate::layout::Category;
use crate::store::ChunkStore;

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub staging_removed: usize,
    pub temporaries_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.staging_removed == 0 && self.temporaries_removed == 0
    }
}

impl ChunkStore {
    /// Removes abandoned staging sets and leftover merge temporaries.
    ///
    /// Anything last modified more than `staging_ttl` ago is expired.
    /// Staging sets held by a running merge are skipped.
    pub async fn sweep_expired(&self) -> Result<SweepReport, StoreError> {
        self.sweep_expired_at(SystemTime::now()).await
    }

    pub(crate) async fn sweep_expired_at(
        &self,
        now: SystemTime,
    ) -> Result<SweepReport, StoreError> {
        let ttl = self.config.staging_ttl;
        let mut report = SweepReport::default();

        for category in Category::ALL {
            let dir = self.config.root.join(category.as_str());
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                if !is_expired(meta.modified().ok(), now, ttl) {
                    continue;
                }

                if meta.is_dir() {
                    if self.is_locked(&path) {
                        debug!(path = %path.display(), "staging set busy, skipping");
                        continue;
                    }
                    if remove(&path, true).await {
                        report.staging_removed += 1;
                    }
                } else if is_merge_temp(&path)
                    && !self.is_locked(&staging_for_temp(&path))
                    && remove(&path, false).await
                {
                    report.temporaries_removed += 1;
                }
            }
        }

        Ok(report)
    }
}

fn is_expired(modified: Option<SystemTime>, now: SystemTime, ttl: Duration) -> bool {
    match modified {
        Some(modified) => now.duration_since(modified).unwrap_or_default() >= ttl,
        None => false,
    }
}

fn is_merge_temp(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "tmp")
}

/// Staging directory whose merge produced `temp` (`{fp}.{ext}.{uuid}.tmp`).
fn staging_for_temp(temp: &Path) -> std::path::PathBuf {
    let name = temp
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let fp = name.split('.').next().unwrap_or_default();
    temp.with_file_name(fp)
}

async fn remove(path: &Path, dir: bool) -> bool {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "expired entry removed");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove expired entry");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreConfig;
    use crate::layout;
    use crate::store::tests::{ext, fp_of};
    use tempfile::TempDir;

    fn store_with_ttl(dir: &TempDir, ttl: Duration) -> ChunkStore {
        let mut config = StoreConfig::new(dir.path());
        config.staging_ttl = ttl;
        ChunkStore::new(config)
    }

    #[tokio::test]
    async fn sweep_on_empty_root() {
        let dir = TempDir::new().unwrap();
        let store = store_with_ttl(&dir, Duration::ZERO);
        let report = store.sweep_expired().await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn fresh_staging_is_kept() {
        let dir = TempDir::new().unwrap();
        let store = store_with_ttl(&dir, Duration::from_secs(3600));
        let fp = fp_of(b"keep");
        let e = ext("bin");
        store.put_chunk(&fp, &e, 1, b"x", None, 0).await.unwrap();

        let report = store.sweep_expired().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(store.chunk_count(&fp, &e).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_staging_and_temps_are_removed() {
        let dir = TempDir::new().unwrap();
        let store = store_with_ttl(&dir, Duration::from_secs(60));
        let fp = fp_of(b"old");
        let e = ext("mp4");
        store.put_chunk(&fp, &e, 1, b"x", None, 0).await.unwrap();

        let artifact = layout::artifact_path(dir.path(), &fp, &e);
        let temp = layout::merge_temp_path(&artifact);
        std::fs::write(&temp, b"half merged").unwrap();

        let later = SystemTime::now() + Duration::from_secs(120);
        let report = store.sweep_expired_at(later).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                staging_removed: 1,
                temporaries_removed: 1
            }
        );
        assert!(!temp.exists());
        assert_eq!(store.chunk_count(&fp, &e).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn artifacts_are_never_swept() {
        let dir = TempDir::new().unwrap();
        let store = store_with_ttl(&dir, Duration::ZERO);
        let content = b"published";
        let fp = fp_of(content);
        let e = ext("txt");
        store.put_chunk(&fp, &e, 1, content, None, 0).await.unwrap();
        store.merge(&fp, &e, 1).await.unwrap();

        let later = SystemTime::now() + Duration::from_secs(3600);
        store.sweep_expired_at(later).await.unwrap();
        assert!(store.artifact_exists(&fp, &e).await.unwrap());
    }

    #[tokio::test]
    async fn locked_staging_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_with_ttl(&dir, Duration::ZERO);
        let fp = fp_of(b"busy");
        let e = ext("bin");
        store.put_chunk(&fp, &e, 1, b"x", None, 0).await.unwrap();

        let staging = layout::staging_dir(dir.path(), &fp, &e);
        let held = store.lock_staging(&staging).await;
        let later = SystemTime::now() + Duration::from_secs(10);
        let report = store.sweep_expired_at(later).await.unwrap();
        assert_eq!(report.staging_removed, 0);
        assert!(staging.exists());

        drop(held);
        let report = store.sweep_expired_at(later).await.unwrap();
        assert_eq!(report.staging_removed, 1);
    }

    #[test]
    fn temp_maps_back_to_staging() {
        let temp = Path::new("/r/video/abcd.mp4.1234.tmp");
        assert_eq!(staging_for_temp(temp), Path::new("/r/video/abcd"));
        assert!(is_merge_temp(temp));
        assert!(!is_merge_temp(Path::new("/r/video/abcd.mp4")));
    }
}
