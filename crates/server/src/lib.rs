//! WebSocket server for chunkup uploads.
//!
//! Accepts any number of client connections, dispatches JSON and binary
//! messages to a [`Handler`], and manages each connection's lifecycle
//! (ping/pong, bounded concurrent dispatch, graceful shutdown).
//! [`StoreHandler`] wires the handler to a [`chunkup_store::ChunkStore`].

mod connection;
mod handler;
mod server;
mod store_handler;

pub use connection::{ClientConnection, ClientMeta, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, UploadServer};
pub use store_handler::StoreHandler;

/// Send buffer capacity per connection.
///
/// Every chunk gets one reply; a client with many chunks in flight must
/// not make `try_send()` drop acknowledgements.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// Requests handled concurrently on one connection.
pub const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
