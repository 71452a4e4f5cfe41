//! Binary frame format: 4-byte big-endian header length + JSON header + raw chunk bytes.

use serde::{Deserialize, Serialize};

use crate::messages::is_zero;
use crate::types::{Extension, Fingerprint};

/// Header of a binary chunk upload frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    /// Request id; the reply envelope carries the same id.
    #[serde(default)]
    pub id: String,
    pub file_hash: Fingerprint,
    pub extname: Extension,
    pub chunk_index: u32,
    /// SHA-256 hex of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    /// Bytes per chunk the client sliced with; 0 when not declared.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub chunk_size: u64,
}

/// A parsed binary chunk frame.
#[derive(Debug)]
pub struct BinaryChunk {
    pub header: ChunkHeader,
    pub data: Vec<u8>,
}

/// Parses a raw binary WebSocket frame.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_binary_message(data: &[u8]) -> Result<BinaryChunk, ParseError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(ParseError::TooShort);
    };
    let header_len = u32::from_be_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }

    let (header_bytes, payload) = rest.split_at(header_len);
    let header: ChunkHeader =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    Ok(BinaryChunk {
        header,
        data: payload.to_vec(),
    })
}

/// Encodes a binary frame for sending over WebSocket.
pub fn encode_binary_message<T: Serialize>(
    header: &T,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
