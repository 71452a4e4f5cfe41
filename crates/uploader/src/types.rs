//! Data types for the upload flow.

use std::path::{Path, PathBuf};

use chunkup_protocol::constants::MAX_CHUNK_SIZE;
use chunkup_protocol::{Extension, Fingerprint, NegotiationStatus};
use chunkup_transfer::DEFAULT_CHUNK_SIZE;

use crate::error::UploadError;

/// Chunk uploads kept in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// What to upload and how.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub path: PathBuf,
    /// Bytes per chunk; 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Maximum chunk uploads in flight.
    pub concurrency: usize,
    /// Overrides the extension taken from the file name.
    pub extension: Option<Extension>,
}

impl UploadConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            extension: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Extension sent to the server.
    ///
    /// Files without a usable extension are uploaded as `bin`.
    pub fn resolve_extension(&self) -> Result<Extension, UploadError> {
        if let Some(ext) = &self.extension {
            return Ok(ext.clone());
        }
        let name = file_name(&self.path);
        Extension::from_file_name(&name)
            .map_err(|e| UploadError::Protocol(format!("{}: {e}", self.path.display())))
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    /// Chunk size to slice with; a chunk must fit in one WebSocket message.
    pub(crate) fn checked_chunk_size(&self) -> Result<usize, UploadError> {
        let size = self.effective_chunk_size();
        if size > MAX_CHUNK_SIZE {
            return Err(UploadError::ChunkTooLarge {
                size,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(size)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Slicing and fingerprinting started.
    Hashing { path: PathBuf },
    /// The whole file was read.
    Hashed {
        fingerprint: Fingerprint,
        total_count: u32,
        file_size: u64,
    },
    /// The server answered negotiate.
    Negotiated {
        status: NegotiationStatus,
        needed: u32,
        total_count: u32,
    },
    /// Share of chunks the server holds. Never decreases within a run.
    Progress {
        percent: u8,
        bytes_sent: u64,
        bytes_per_second: f64,
    },
    /// Every chunk is stored; merge was requested.
    Merging,
    /// A failed attempt will be followed by another.
    Retrying { attempt: u32, error: String },
    Completed { address: String, deduplicated: bool },
    Failed { error: String },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub fingerprint: Fingerprint,
    pub extension: Extension,
    /// Public address of the artifact.
    pub address: String,
    pub total_count: u32,
    /// How the server answered negotiate.
    pub status: NegotiationStatus,
    pub chunks_sent: u32,
    pub bytes_sent: u64,
    /// The artifact existed before this run finished its merge.
    pub already_existed: bool,
}

impl UploadOutcome {
    /// `true` when no chunk had to be sent and no merge wrote anything.
    pub fn deduplicated(&self) -> bool {
        self.status == NegotiationStatus::Complete
    }
}
