use serde::{Deserialize, Serialize};

use crate::types::{Extension, Fingerprint, NegotiationStatus};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks which chunks of a file the server still needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateRequest {
    pub file_hash: Fingerprint,
    pub total_count: u32,
    pub extname: Extension,
    /// Bytes per chunk the client sliced with; 0 when not declared.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub chunk_size: u64,
}

/// Asks the server to assemble the staged chunks into the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_hash: Fingerprint,
    pub extname: Extension,
    pub total_count: u32,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of a negotiate request.
///
/// `needed_indices` is ascending and 1-based. `file_path` is only present
/// when the artifact already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub status: NegotiationStatus,
    #[serde(default)]
    pub needed_indices: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Acknowledges one stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutChunkResponse {
    pub file_hash: Fingerprint,
    pub chunk_index: u32,
    pub bytes_written: u64,
}

/// Result of a merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub file_path: String,
    /// `true` when the artifact was already published before this request.
    #[serde(default, skip_serializing_if = "is_false")]
    pub already_existed: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

pub(crate) fn is_zero(v: &u64) -> bool {
    *v == 0
}
