//! WebSocket client for talking to a chunkup server.
//!
//! Request/response over text frames with UUID correlation, binary chunk
//! frames, and ping/pong keepalive.

mod pumps {
    pub(crate) mod ping;
    pub(crate) mod read;
    pub(crate) mod write;
}
pub mod ws_client;

pub use ws_client::{WsClient, WsError};
