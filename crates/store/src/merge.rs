use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chunkup_protocol::{Extension, Fingerprint};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::StoreError;
use crate::layout;
use crate::store::{ChunkStore, check_total_count, list_chunks};

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Public address of the artifact.
    pub address: String,
    /// Location of the artifact on disk.
    pub path: PathBuf,
    /// `true` if the artifact was published by an earlier request.
    pub already_existed: bool,
}

impl ChunkStore {
    /// Assembles the staged chunks of `fp` into its artifact.
    ///
    /// Merges of the same staging set are serialized; the second caller
    /// sees the first caller's artifact. Nothing is published unless every
    /// index in `1..=total_count` is staged and, for SHA-256 fingerprints
    /// with verification on, the content hashes back to `fp`.
    pub async fn merge(
        &self,
        fp: &Fingerprint,
        ext: &Extension,
        total_count: u32,
    ) -> Result<MergeOutcome, StoreError> {
        check_total_count(total_count)?;

        let root = &self.config.root;
        let staging = layout::staging_dir(root, fp, ext);
        let artifact = layout::artifact_path(root, fp, ext);
        let address = self.public_address(fp, ext);

        let _lock = self.lock_staging(&staging).await;

        if tokio::fs::try_exists(&artifact).await? {
            debug!(fingerprint = %fp, "artifact already published");
            return Ok(MergeOutcome {
                address,
                path: artifact,
                already_existed: true,
            });
        }

        let present = list_chunks(&staging).await?;
        match verify_complete(&present, total_count) {
            Ok(()) => {}
            Err(err @ StoreError::CountMismatch { .. }) => {
                warn!(fingerprint = %fp, error = %err, "discarding mismatched staging set");
                reclaim(&staging).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        if let Some(parent) = artifact.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let expected = (self.config.verify_fingerprint && fp.is_sha256()).then(|| fp.clone());
        let job = ConcatJob {
            staging: staging.clone(),
            artifact: artifact.clone(),
            total_count,
            expected,
        };
        let result = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| StoreError::Task(format!("merge task: {e}")))?;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err @ StoreError::FingerprintMismatch { .. }) => {
                warn!(fingerprint = %fp, error = %err, "discarding staging set");
                reclaim(&staging).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        reclaim(&staging).await;
        info!(
            fingerprint = %fp,
            total_count,
            bytes,
            path = %artifact.display(),
            "artifact published"
        );

        Ok(MergeOutcome {
            address,
            path: artifact,
            already_existed: false,
        })
    }
}

/// Checks that `present` (ascending) is exactly `1..=total_count`.
pub(crate) fn verify_complete(present: &[u32], total_count: u32) -> Result<(), StoreError> {
    if let Some(&highest) = present.last()
        && highest > total_count
    {
        return Err(StoreError::CountMismatch {
            expected: total_count,
            found: highest,
        });
    }

    let mut missing = Vec::new();
    let mut iter = present.iter().copied().peekable();
    for expected in 1..=total_count {
        while iter.next_if(|&i| i < expected).is_some() {}
        if iter.next_if_eq(&expected).is_none() {
            missing.push(expected);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::TransferIncomplete { missing })
    }
}

async fn reclaim(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "failed to reclaim staging"),
    }
}

struct ConcatJob {
    staging: PathBuf,
    artifact: PathBuf,
    total_count: u32,
    expected: Option<Fingerprint>,
}

impl ConcatJob {
    fn run(self) -> Result<u64, StoreError> {
        let temp = layout::merge_temp_path(&self.artifact);
        match self.write_temp(&temp) {
            Ok(bytes) => {
                if let Err(e) = std::fs::rename(&temp, &self.artifact) {
                    let _ = std::fs::remove_file(&temp);
                    return Err(e.into());
                }
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn write_temp(&self, temp: &Path) -> Result<u64, StoreError> {
        let file = OpenOptions::new().write(true).create_new(true).open(temp)?;
        let mut out = BufWriter::new(file);
        let mut hasher = self.expected.as_ref().map(|_| Sha256::new());
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;

        for index in 1..=self.total_count {
            let mut chunk = File::open(layout::chunk_path(&self.staging, index))?;
            loop {
                let n = chunk.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                if let Some(h) = hasher.as_mut() {
                    h.update(&buf[..n]);
                }
                total += n as u64;
            }
        }

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        if let (Some(expected), Some(h)) = (&self.expected, hasher) {
            let actual = hex::encode(h.finalize());
            if actual != expected.as_str() {
                return Err(StoreError::FingerprintMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreConfig;
    use crate::store::tests::{ext, fp_of, new_store};
    use chunkup_protocol::NegotiationStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn stage(store: &ChunkStore, fp: &Fingerprint, e: &Extension, chunks: &[&[u8]]) {
        for (i, data) in chunks.iter().enumerate() {
            store
                .put_chunk(fp, e, i as u32 + 1, data, None, 0)
                .await
                .unwrap();
        }
    }

    #[test]
    fn verify_complete_cases() {
        assert!(verify_complete(&[1, 2, 3], 3).is_ok());
        assert!(verify_complete(&[], 0).is_ok());
        assert!(matches!(
            verify_complete(&[1, 2, 3, 5], 5),
            Err(StoreError::TransferIncomplete { missing }) if missing == vec![4]
        ));
        assert!(matches!(
            verify_complete(&[1, 2, 3, 4], 3),
            Err(StoreError::CountMismatch { expected: 3, found: 4 })
        ));
        assert!(matches!(
            verify_complete(&[], 2),
            Err(StoreError::TransferIncomplete { missing }) if missing == vec![1, 2]
        ));
    }

    #[tokio::test]
    async fn merge_concatenates_in_index_order() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let content = b"0123456789abcdefghij";
        let fp = fp_of(content);
        let e = ext("txt");

        // Arrival order does not matter; 10 sorts after 9.
        let pieces: Vec<&[u8]> = content.chunks(2).collect();
        for i in (0..pieces.len()).rev() {
            store
                .put_chunk(&fp, &e, i as u32 + 1, pieces[i], None, 0)
                .await
                .unwrap();
        }

        let outcome = store.merge(&fp, &e, pieces.len() as u32).await.unwrap();
        assert!(!outcome.already_existed);
        assert_eq!(outcome.address, format!("/uploads/document/{fp}.txt"));
        assert_eq!(std::fs::read(&outcome.path).unwrap(), content);

        // Staging reclaimed, no temporaries left.
        let staging = layout::staging_dir(dir.path(), &fp, &e);
        assert!(!staging.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("document"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn merge_twice_returns_same_address() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"abc");
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"a", b"bc"]).await;

        let first = store.merge(&fp, &e, 2).await.unwrap();
        let second = store.merge(&fp, &e, 2).await.unwrap();
        assert_eq!(first.address, second.address);
        assert!(second.already_existed);

        let n = store.negotiate(&fp, &e, 2, 0).await.unwrap();
        assert_eq!(n.status, NegotiationStatus::Complete);
        assert_eq!(n.address.as_deref(), Some(first.address.as_str()));
    }

    #[tokio::test]
    async fn merge_incomplete_leaves_staging() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"12345");
        let e = ext("bin");
        for i in [1, 2, 3, 5] {
            store.put_chunk(&fp, &e, i, b"x", None, 0).await.unwrap();
        }

        let err = store.merge(&fp, &e, 5).await.unwrap_err();
        assert!(matches!(&err, StoreError::TransferIncomplete { missing } if missing == &vec![4]));
        assert_eq!(err.code(), 409);
        assert_eq!(
            store.present_indices(&fp, &e).await.unwrap(),
            vec![1, 2, 3, 5]
        );
        assert!(!store.artifact_exists(&fp, &e).await.unwrap());
    }

    #[tokio::test]
    async fn merge_rejects_extra_indices() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"extra");
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"a", b"b", b"c"]).await;

        let err = store.merge(&fp, &e, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::CountMismatch { expected: 2, found: 3 }));
        assert_eq!(store.chunk_count(&fp, &e).await.unwrap(), 0);
        assert!(!store.artifact_exists(&fp, &e).await.unwrap());
    }

    #[tokio::test]
    async fn rechunked_upload_recovers_after_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let content = b"abcdefgh";
        let fp = fp_of(content);
        let e = ext("bin");
        // An earlier client sliced the file into four 2-byte chunks.
        stage(&store, &fp, &e, &[b"ab", b"cd", b"ef", b"gh"]).await;

        // The same file re-sliced into two 4-byte chunks must not look mergeable.
        let n = store.negotiate(&fp, &e, 2, 0).await.unwrap();
        assert_eq!(n.status, NegotiationStatus::Fresh);
        assert_eq!(n.needed_indices, vec![1, 2]);

        assert!(matches!(
            store.merge(&fp, &e, 2).await,
            Err(StoreError::CountMismatch { .. })
        ));

        // Retrying the whole sequence now succeeds.
        let n = store.negotiate(&fp, &e, 2, 0).await.unwrap();
        assert_eq!(n.status, NegotiationStatus::Fresh);
        stage(&store, &fp, &e, &[b"abcd", b"efgh"]).await;
        let outcome = store.merge(&fp, &e, 2).await.unwrap();
        assert_eq!(std::fs::read(outcome.path).unwrap(), content);
    }

    #[tokio::test]
    async fn sized_chunks_replace_another_chunking() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.verify_fingerprint = false;
        let store = ChunkStore::new(config);
        let content = b"0123456789";
        let fp = fp_of(content);
        let e = ext("bin");

        // Chunk size 5: only the first chunk made it.
        store.put_chunk(&fp, &e, 1, b"01234", None, 5).await.unwrap();

        // Chunk size 6 gives the same total count of 2.
        let n = store.negotiate(&fp, &e, 2, 6).await.unwrap();
        assert_eq!(n.status, NegotiationStatus::Fresh);
        assert_eq!(n.needed_indices, vec![1, 2]);

        store.put_chunk(&fp, &e, 2, b"6789", None, 6).await.unwrap();
        assert_eq!(store.present_indices(&fp, &e).await.unwrap(), vec![2]);
        store.put_chunk(&fp, &e, 1, b"012345", None, 6).await.unwrap();

        let outcome = store.merge(&fp, &e, 2).await.unwrap();
        assert_eq!(std::fs::read(outcome.path).unwrap(), content);
    }

    #[tokio::test]
    async fn merge_single_chunk() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"only one");
        let e = ext("bin");

        let n = store.negotiate(&fp, &e, 1, 0).await.unwrap();
        assert_eq!(n.needed_indices, vec![1]);
        store.put_chunk(&fp, &e, 1, b"only one", None, 0).await.unwrap();
        let outcome = store.merge(&fp, &e, 1).await.unwrap();
        assert_eq!(std::fs::read(outcome.path).unwrap(), b"only one");
    }

    #[tokio::test]
    async fn merge_zero_chunks_publishes_empty_artifact() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"");
        let e = ext("txt");

        let outcome = store.merge(&fp, &e, 0).await.unwrap();
        assert!(std::fs::read(&outcome.path).unwrap().is_empty());
        assert_eq!(
            store.negotiate(&fp, &e, 0, 0).await.unwrap().status,
            NegotiationStatus::Complete
        );
    }

    #[tokio::test]
    async fn fingerprint_mismatch_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = fp_of(b"expected content");
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"other ", b"content"]).await;

        let err = store.merge(&fp, &e, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::FingerprintMismatch { .. }));
        assert_eq!(err.code(), 422);
        assert!(!store.artifact_exists(&fp, &e).await.unwrap());
        assert!(store.present_indices(&fp, &e).await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("other")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn verification_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.verify_fingerprint = false;
        let store = ChunkStore::new(config);
        let fp = fp_of(b"declared");
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"actual"]).await;

        let outcome = store.merge(&fp, &e, 1).await.unwrap();
        assert_eq!(std::fs::read(outcome.path).unwrap(), b"actual");
    }

    #[tokio::test]
    async fn short_fingerprints_skip_verification() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let fp = Fingerprint::parse("d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"legacy"]).await;

        assert!(store.merge(&fp, &e, 1).await.is_ok());
    }

    #[tokio::test]
    async fn chunks_after_merge_do_not_change_artifact() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir);
        let content = b"aaabbbccc";
        let fp = fp_of(content);
        let e = ext("bin");
        stage(&store, &fp, &e, &[b"aaa", b"bbb", b"ccc"]).await;
        let outcome = store.merge(&fp, &e, 3).await.unwrap();

        let written = store.put_chunk(&fp, &e, 3, b"zzz", None, 0).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), content);
        assert!(store.present_indices(&fp, &e).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_merges_both_succeed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(new_store(&dir));
        let content = b"racing merge content";
        let fp = fp_of(content);
        let e = ext("bin");
        let pieces: Vec<&[u8]> = content.chunks(5).collect();
        stage(&store, &fp, &e, &pieces).await;

        let a = {
            let (s, fp, e) = (Arc::clone(&store), fp.clone(), e.clone());
            tokio::spawn(async move { s.merge(&fp, &e, 4).await })
        };
        let b = {
            let (s, fp, e) = (Arc::clone(&store), fp.clone(), e.clone());
            tokio::spawn(async move { s.merge(&fp, &e, 4).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.address, b.address);
        assert!(a.already_existed ^ b.already_existed);
        assert_eq!(std::fs::read(&a.path).unwrap(), content);
    }

    #[tokio::test]
    async fn rerun_produces_identical_artifact() {
        let content: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let fp = fp_of(&content);
        let e = ext("bin");

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let dir = TempDir::new().unwrap();
            let store = new_store(&dir);
            let pieces: Vec<&[u8]> = content.chunks(700).collect();
            stage(&store, &fp, &e, &pieces).await;
            let outcome = store.merge(&fp, &e, pieces.len() as u32).await.unwrap();
            outputs.push(std::fs::read(outcome.path).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], content);
    }
}
