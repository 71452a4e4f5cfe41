use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chunkup_protocol::Fingerprint;

/// One indexed chunk of a file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based position within the file.
    pub index: u32,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Everything learned about a file from one slicing pass.
#[derive(Debug, Clone)]
pub struct FileManifest {
    pub fingerprint: Fingerprint,
    pub total_count: u32,
    pub file_size: u64,
    pub chunk_size: usize,
    /// Per-chunk checksums; entry `i` belongs to chunk `i + 1`.
    pub checksums: Vec<String>,
}

impl FileManifest {
    /// Checksum recorded for the given 1-based index.
    pub fn checksum(&self, index: u32) -> Option<&str> {
        let slot = (index as usize).checked_sub(1)?;
        self.checksums.get(slot).map(String::as_str)
    }

    /// Size of the chunk with the given index.
    pub fn chunk_len(&self, index: u32) -> u64 {
        if index == 0 || index > self.total_count {
            return 0;
        }
        let offset = (index as u64 - 1) * self.chunk_size as u64;
        (self.file_size - offset).min(self.chunk_size as u64)
    }
}

/// Lifecycle of a client-side transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Negotiating,
    Uploading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

/// Tracks one in-flight upload (thread-safe).
pub struct TransferSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    fingerprint: Fingerprint,
    total_count: u32,
    needed: BTreeSet<u32>,
    bytes_confirmed: u64,
    status: TransferStatus,
    started_at: Instant,
    updated_at: Instant,
    error: String,
}

impl TransferSession {
    /// Creates a session that has not negotiated yet.
    ///
    /// Until [`set_needed`](Self::set_needed) is called every index counts
    /// as needed.
    pub fn new(fingerprint: Fingerprint, total_count: u32) -> Self {
        let now = Instant::now();
        Self {
            inner: RwLock::new(SessionInner {
                fingerprint,
                total_count,
                needed: (1..=total_count).collect(),
                bytes_confirmed: 0,
                status: TransferStatus::Negotiating,
                started_at: now,
                updated_at: now,
                error: String::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the server's answer to negotiate.
    ///
    /// Indices outside `1..=total_count` are dropped.
    pub fn set_needed(&self, indices: &[u32]) {
        let mut s = self.write();
        let total = s.total_count;
        s.needed = indices
            .iter()
            .copied()
            .filter(|i| (1..=total).contains(i))
            .collect();
        s.status = TransferStatus::Uploading;
        s.updated_at = Instant::now();
    }

    /// Marks a chunk as stored by the server.
    ///
    /// Returns `false` if the index was not outstanding (duplicate ack).
    pub fn confirm_chunk(&self, index: u32, bytes: u64) -> bool {
        let mut s = self.write();
        if !s.needed.remove(&index) {
            return false;
        }
        s.bytes_confirmed += bytes;
        s.updated_at = Instant::now();
        true
    }

    pub fn begin_merge(&self) {
        self.set_status(TransferStatus::Merging);
    }

    pub fn complete(&self) {
        let mut s = self.write();
        s.needed.clear();
        s.status = TransferStatus::Completed;
        s.updated_at = Instant::now();
    }

    /// Marks the session as failed with an error message.
    pub fn fail(&self, err: &str) {
        let mut s = self.write();
        s.status = TransferStatus::Failed;
        s.error = err.to_string();
        s.updated_at = Instant::now();
    }

    pub fn cancel(&self) {
        self.set_status(TransferStatus::Cancelled);
    }

    fn set_status(&self, status: TransferStatus) {
        let mut s = self.write();
        s.status = status;
        s.updated_at = Instant::now();
    }

    /// Outstanding indices in ascending order.
    pub fn needed(&self) -> Vec<u32> {
        self.read().needed.iter().copied().collect()
    }

    /// Chunks the server holds, counting those present before this session.
    pub fn present_count(&self) -> u32 {
        let s = self.read();
        s.total_count - s.needed.len() as u32
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.read().status,
            TransferStatus::Negotiating | TransferStatus::Uploading | TransferStatus::Merging
        )
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.read().fingerprint.clone()
    }

    pub fn total_count(&self) -> u32 {
        self.read().total_count
    }

    /// Bytes acknowledged during this session.
    pub fn bytes_confirmed(&self) -> u64 {
        self.read().bytes_confirmed
    }

    pub fn status(&self) -> TransferStatus {
        self.read().status
    }

    pub fn error(&self) -> String {
        self.read().error.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.read().started_at.elapsed()
    }

    /// Time since the last state change.
    pub fn idle_for(&self) -> Duration {
        self.read().updated_at.elapsed()
    }
}
