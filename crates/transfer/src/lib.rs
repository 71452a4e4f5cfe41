//! Client-side half of the chunked transfer: slicing a file into indexed
//! chunks, fingerprinting it, and tracking an upload's progress.

mod chunked;
mod progress;
mod slicer;
mod types;

pub use chunked::{
    ChunkReader, FingerprintHasher, calculate_file_fingerprint, checksum_bytes, chunk_count,
};
pub use progress::{ProgressTracker, SpeedCalculator};
pub use slicer::{SLICE_QUEUE_DEPTH, SliceEvent, SliceStream, spawn_slicer};
pub use types::{Chunk, FileManifest, TransferSession, TransferStatus};

pub use chunkup_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk index {index} outside 1..={count}")]
    InvalidChunkIndex { index: u32, count: u32 },

    #[error("file needs {count} chunks, more than the protocol allows")]
    TooManyChunks { count: u64 },

    #[error("source file changed since hashing (chunk {index})")]
    SourceChanged { index: u32 },

    #[error("slicer failed: {0}")]
    Slicer(String),
}
