//! Transport seam between the upload flow and a server.

use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::{Message, MessageType};

use crate::error::UploadError;

/// Future returned by [`ServerConnection`] calls.
pub type ConnectionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + 'a>>;

/// Abstract connection to a chunkup server.
///
/// The upload app implements this on top of `WsClient`; tests use
/// in-memory mocks. Implementations report error envelopes as
/// [`UploadError::Server`].
pub trait ServerConnection: Send + Sync {
    /// Sends a JSON request and waits for the reply.
    fn send_request(&self, msg_type: MessageType, payload: &serde_json::Value)
    -> ConnectionFuture<'_>;

    /// Sends one chunk as a binary frame and waits for the text reply.
    fn send_binary(&self, header: &serde_json::Value, data: &[u8]) -> ConnectionFuture<'_>;

    /// Identifies the server in logs.
    fn server_id(&self) -> &str;
}
