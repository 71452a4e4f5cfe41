//! Handler trait for processing upload requests.
//!
//! Implementors provide the storage logic while the server framework
//! handles connection management, routing, and the binary frame format.

use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use chunkup_protocol::{ChunkHeader, Message, MessageType};

use crate::connection::{ClientMeta, Sender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from upload clients.
///
/// Each method receives a `sender` for replies and the parsed request.
/// Requests on one connection may be handled concurrently, so replies must
/// carry the request id (see [`Message::reply`]).
///
/// Default implementations reply with "not implemented".
pub trait Handler: Send + Sync + 'static {
    /// Called for `negotiate`.
    fn on_negotiate(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `merge`.
    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_put_chunk(
        &self,
        sender: Sender,
        header: ChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        let _ = data;
        Box::pin(async move {
            let _ =
                sender.send_error_for(&header.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called once a client connection has closed.
    fn on_client_disconnected(&self, meta: &ClientMeta) -> HandlerFuture<'_> {
        let _ = meta;
        Box::pin(async {})
    }
}
