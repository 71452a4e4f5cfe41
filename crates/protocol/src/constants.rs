use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// the connection is considered dead. Set high enough to tolerate a slow
/// merge of a large file on the server side.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary request/response operations (chunk uploads).
///
/// Chunk writes include a checksum pass and an fsync on the server, so they
/// may take significantly longer than plain text requests.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for `merge` requests.
///
/// A merge streams every chunk of the file into the artifact and hashes it.
pub const WS_MERGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Default chunk size used by clients: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default upper bound the server accepts for a single chunk: 10 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Room kept in a binary message for the length prefix and the JSON chunk header.
pub const CHUNK_FRAME_OVERHEAD: usize = 64 * 1024;

/// Largest chunk payload that still fits in one WebSocket message.
pub const MAX_CHUNK_SIZE: usize = WS_MAX_MESSAGE_SIZE - CHUNK_FRAME_OVERHEAD;

/// [`MAX_CHUNK_SIZE`] rounded down to whole MiB, the unit of chunk size settings.
pub const MAX_CHUNK_SIZE_MB: u64 = (MAX_CHUNK_SIZE / (1024 * 1024)) as u64;

/// Largest `totalCount` a negotiate or merge request may declare.
pub const MAX_TOTAL_COUNT: u32 = 1_000_000;

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "negotiate")]
    Negotiate,
    #[serde(rename = "merge")]
    Merge,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "negotiate_response")]
    NegotiateResponse,
    #[serde(rename = "put_chunk_response")]
    PutChunkResponse,
    #[serde(rename = "merge_response")]
    MergeResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common WebSocket error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_PAYLOAD_TOO_LARGE: i32 = 413;
pub const WS_ERR_CODE_UNPROCESSABLE: i32 = 422;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
