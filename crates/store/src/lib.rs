//! Server-side storage for chunked uploads.
//!
//! Chunks are staged per fingerprint under `{root}/{category}/{fingerprint}/`
//! and assembled into `{root}/{category}/{fingerprint}.{ext}` once every
//! index is present. All writes go through a temporary file and a rename,
//! so readers never observe partial data.

mod config;
mod layout;
mod merge;
mod store;
mod sweep;

pub use config::{DEFAULT_STAGING_TTL, StoreConfig};
pub use layout::{Category, parse_chunk_file_name};
pub use merge::MergeOutcome;
pub use store::{ChunkStore, Negotiation};
pub use sweep::SweepReport;

use chunkup_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CONFLICT, WS_ERR_CODE_INTERNAL,
    WS_ERR_CODE_PAYLOAD_TOO_LARGE, WS_ERR_CODE_UNPROCESSABLE,
};

/// Errors produced by the chunk store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid chunk index {0} (indices start at 1)")]
    InvalidIndex(u32),

    #[error("invalid total count {0}")]
    InvalidCount(u32),

    #[error("chunk of {size} bytes exceeds the {max} byte limit")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("staging holds chunk {found} but total count is {expected}")]
    CountMismatch { expected: u32, found: u32 },

    #[error("transfer incomplete: {} chunk(s) missing ({})", missing.len(), preview(missing))]
    TransferIncomplete { missing: Vec<u32> },

    #[error("merged content hashes to {actual}, expected {expected}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Wire error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidIndex(_) | Self::InvalidCount(_) | Self::CountMismatch { .. } => {
                WS_ERR_CODE_BAD_REQUEST
            }
            Self::ChunkTooLarge { .. } => WS_ERR_CODE_PAYLOAD_TOO_LARGE,
            Self::ChecksumMismatch { .. } | Self::FingerprintMismatch { .. } => {
                WS_ERR_CODE_UNPROCESSABLE
            }
            Self::TransferIncomplete { .. } => WS_ERR_CODE_CONFLICT,
            Self::Io(_) | Self::Task(_) => WS_ERR_CODE_INTERNAL,
        }
    }

    /// Returns `true` for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Task(_))
    }
}

fn preview(indices: &[u32]) -> String {
    const SHOWN: usize = 8;
    let mut out: Vec<String> = indices.iter().take(SHOWN).map(u32::to_string).collect();
    if indices.len() > SHOWN {
        out.push("...".into());
    }
    out.join(", ")
}
