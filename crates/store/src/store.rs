use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chunkup_protocol::constants::MAX_TOTAL_COUNT;
use chunkup_protocol::{Extension, Fingerprint, NegotiationStatus};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::StoreError;
use crate::config::StoreConfig;
use crate::layout;

/// Answer to a negotiate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub status: NegotiationStatus,
    /// Ascending, 1-based indices the client still has to send.
    pub needed_indices: Vec<u32>,
    /// Public address, set only when the artifact already exists.
    pub address: Option<String>,
}

type LockMap = Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>;

/// Chunk staging, presence queries and merging for one storage root.
pub struct ChunkStore {
    pub(crate) config: StoreConfig,
    locks: LockMap,
}

/// Exclusive hold on one staging set. Released on drop.
pub(crate) struct StagingLock<'a> {
    locks: &'a LockMap,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StagingLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.key);
        }
    }
}

impl ChunkStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for exclusive access to a staging set.
    pub(crate) async fn lock_staging(&self, staging: &Path) -> StagingLock<'_> {
        let mutex = {
            let mut map = self.lock_map();
            Arc::clone(map.entry(staging.to_path_buf()).or_default())
        };
        let guard = mutex.lock_owned().await;
        StagingLock {
            locks: &self.locks,
            key: staging.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Returns `true` while a merge holds the staging set.
    pub(crate) fn is_locked(&self, staging: &Path) -> bool {
        self.lock_map().contains_key(staging)
    }

    /// Reports what the client still has to send. Never creates anything.
    ///
    /// A staging set that cannot belong to this chunking of the file
    /// (indices beyond `total_count`, or tagged with a different
    /// `chunk_size`) is reported as `fresh`. The next sized chunk write
    /// replaces it. A `chunk_size` of 0 skips the tag comparison.
    pub async fn negotiate(
        &self,
        fp: &Fingerprint,
        ext: &Extension,
        total_count: u32,
        chunk_size: u64,
    ) -> Result<Negotiation, StoreError> {
        check_total_count(total_count)?;

        let artifact = layout::artifact_path(&self.config.root, fp, ext);
        if tokio::fs::try_exists(&artifact).await? {
            return Ok(Negotiation {
                status: NegotiationStatus::Complete,
                needed_indices: Vec::new(),
                address: Some(self.public_address(fp, ext)),
            });
        }

        let staging = layout::staging_dir(&self.config.root, fp, ext);
        let mut present = list_chunks(&staging).await?;
        let out_of_range = present.last().is_some_and(|&highest| highest > total_count);
        let tag = read_chunk_size_tag(&staging).await?;
        let other_size = chunk_size > 0 && tag.is_some_and(|t| t != chunk_size);
        if out_of_range || other_size {
            debug!(
                fingerprint = %fp,
                total_count,
                chunk_size,
                staged_chunk_size = ?tag,
                "staging set belongs to another chunking"
            );
            present.clear();
        }

        let mut have = vec![false; total_count as usize];
        let mut present_in_range = 0usize;
        for index in present {
            if let Some(slot) = index.checked_sub(1).and_then(|i| have.get_mut(i as usize)) {
                *slot = true;
                present_in_range += 1;
            }
        }
        let needed_indices: Vec<u32> = (1..=total_count)
            .filter(|i| !have[*i as usize - 1])
            .collect();

        let status = if needed_indices.is_empty() {
            NegotiationStatus::ReadyToMerge
        } else if present_in_range > 0 {
            NegotiationStatus::Resume
        } else {
            NegotiationStatus::Fresh
        };
        debug!(
            fingerprint = %fp,
            total_count,
            needed = needed_indices.len(),
            ?status,
            "negotiated"
        );

        Ok(Negotiation {
            status,
            needed_indices,
            address: None,
        })
    }

    /// Stores one chunk and returns the number of bytes written.
    ///
    /// `checksum`, when given and non-empty, must be the SHA-256 hex of
    /// `data`. Rejected chunks leave nothing on disk. Chunks for an
    /// artifact that already exists are acknowledged and dropped.
    ///
    /// A non-zero `chunk_size` tags the staging set with the slicing the
    /// client used. If the set carries a different tag, its chunks came
    /// from another chunking of the file and are discarded first.
    pub async fn put_chunk(
        &self,
        fp: &Fingerprint,
        ext: &Extension,
        index: u32,
        data: &[u8],
        checksum: Option<&str>,
        chunk_size: u64,
    ) -> Result<u64, StoreError> {
        if index == 0 || index > MAX_TOTAL_COUNT {
            return Err(StoreError::InvalidIndex(index));
        }
        if data.len() > self.config.max_chunk_size {
            return Err(StoreError::ChunkTooLarge {
                size: data.len(),
                max: self.config.max_chunk_size,
            });
        }
        if let Some(expected) = checksum.filter(|c| !c.is_empty()) {
            let actual = hex::encode(Sha256::digest(data));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(StoreError::ChecksumMismatch { index });
            }
        }

        let artifact = layout::artifact_path(&self.config.root, fp, ext);
        if tokio::fs::try_exists(&artifact).await? {
            debug!(fingerprint = %fp, index, "artifact exists, discarding chunk");
            return Ok(data.len() as u64);
        }

        let staging = layout::staging_dir(&self.config.root, fp, ext);
        if chunk_size > 0 {
            self.tag_chunk_size(fp, &staging, chunk_size).await?;
        } else {
            tokio::fs::create_dir_all(&staging).await?;
        }

        let temp = layout::chunk_temp_path(&staging, index);
        if let Err(e) = write_file(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, layout::chunk_path(&staging, index)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(fingerprint = %fp, index, bytes = data.len(), "chunk stored");
        Ok(data.len() as u64)
    }

    /// Indices currently staged for a fingerprint, ascending.
    pub async fn present_indices(
        &self,
        fp: &Fingerprint,
        ext: &Extension,
    ) -> Result<Vec<u32>, StoreError> {
        let staging = layout::staging_dir(&self.config.root, fp, ext);
        Ok(list_chunks(&staging).await?)
    }

    /// Number of chunks currently staged for a fingerprint.
    pub async fn chunk_count(&self, fp: &Fingerprint, ext: &Extension) -> Result<u32, StoreError> {
        Ok(self.present_indices(fp, ext).await?.len() as u32)
    }

    /// Returns `true` if the artifact for `(fp, ext)` has been published.
    pub async fn artifact_exists(
        &self,
        fp: &Fingerprint,
        ext: &Extension,
    ) -> Result<bool, StoreError> {
        let artifact = layout::artifact_path(&self.config.root, fp, ext);
        Ok(tokio::fs::try_exists(&artifact).await?)
    }

    pub fn public_address(&self, fp: &Fingerprint, ext: &Extension) -> String {
        layout::public_address(&self.config.public_prefix, fp, ext)
    }

    /// Makes sure `staging` exists and is tagged with `chunk_size`.
    async fn tag_chunk_size(
        &self,
        fp: &Fingerprint,
        staging: &Path,
        chunk_size: u64,
    ) -> Result<(), StoreError> {
        if read_chunk_size_tag(staging).await? == Some(chunk_size) {
            return Ok(());
        }

        let _lock = self.lock_staging(staging).await;
        match read_chunk_size_tag(staging).await? {
            Some(tag) if tag == chunk_size => return Ok(()),
            Some(tag) => {
                warn!(
                    fingerprint = %fp,
                    staged_chunk_size = tag,
                    chunk_size,
                    "discarding chunks of another chunking"
                );
                match tokio::fs::remove_dir_all(staging).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            None => {}
        }

        tokio::fs::create_dir_all(staging).await?;
        let tag_path = layout::chunk_size_tag_path(staging);
        let temp = layout::chunk_size_tag_temp_path(staging);
        if let Err(e) = write_file(&temp, chunk_size.to_string().as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &tag_path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Chunk size a staging set was tagged with, if any.
async fn read_chunk_size_tag(staging: &Path) -> io::Result<Option<u64>> {
    match tokio::fs::read_to_string(layout::chunk_size_tag_path(staging)).await {
        Ok(text) => Ok(text.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn check_total_count(total_count: u32) -> Result<(), StoreError> {
    if total_count > MAX_TOTAL_COUNT {
        return Err(StoreError::InvalidCount(total_count));
    }
    Ok(())
}

async fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.sync_data().await?;
    Ok(())
}

/// Lists canonical chunk indices in a staging directory, sorted numerically.
pub(crate) async fn list_chunks(staging: &Path) -> io::Result<Vec<u32>> {
    let mut entries = match tokio::fs::read_dir(staging).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut indices = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(layout::parse_chunk_file_name) else {
            continue;
        };
        if entry.file_type().await?.is_file() {
            indices.push(index);
        } else {
            warn!(path = %entry.path().display(), "ignoring non-file staging entry");
        }
    }
    indices.sort_unstable();
    Ok(indices)
}
