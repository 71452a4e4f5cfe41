//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chunkup_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_NOT_IMPLEMENTED, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use chunkup_protocol::{Message, parse_binary_message};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Semaphore, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::handler::Handler;
use crate::{MAX_CONCURRENT_REQUESTS, SEND_BUFFER_SIZE};

/// Metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    /// Server-assigned id, used in logs.
    pub id: String,
    pub remote_addr: String,
}

impl ClientMeta {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            remote_addr: remote_addr.into(),
        }
    }
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` if the buffer is full or the client disconnected.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Sends an error response for a request known only by id
    /// (binary frames, unparseable envelopes).
    pub fn send_error_for(&self, id: &str, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(Message::error(id, code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to a client.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct ClientConnection {
    pub meta: ClientMeta,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tokio tasks and stop when the connection is
/// closed or the cancel token is triggered. `active` is incremented now and
/// decremented once the connection has fully closed.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    meta: ClientMeta,
    handler: Arc<H>,
    server_cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        meta: meta.clone(),
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();
    active.fetch_add(1, Ordering::SeqCst);

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, sender, Arc::clone(&handler), read_cancel.clone()).await;
        read_cancel.cancel();
        handler.on_client_disconnected(&meta).await;
        active.fetch_sub(1, Ordering::SeqCst);
        tracing::info!(client = %meta.id, addr = %meta.remote_addr, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches each request on its own task.
///
/// At most [`MAX_CONCURRENT_REQUESTS`] requests run at once; further frames
/// wait for a slot. Any inbound frame counts as liveness for the pong
/// deadline.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let slots = Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS));
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut alive = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !alive {
                    tracing::warn!("pong timeout, closing connection");
                    break;
                }
                alive = false;
            }

            frame = stream.next() => {
                let ws_msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                };
                alive = true;

                match ws_msg {
                    WsMessage::Text(text) => {
                        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                            break;
                        };
                        let (handler, sender) = (Arc::clone(&handler), sender.clone());
                        tokio::spawn(async move {
                            dispatch_text(&handler, &sender, text.as_str()).await;
                            drop(permit);
                        });
                    }
                    WsMessage::Binary(data) => {
                        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                            break;
                        };
                        let (handler, sender) = (Arc::clone(&handler), sender.clone());
                        tokio::spawn(async move {
                            dispatch_binary(&handler, &sender, &data).await;
                            drop(permit);
                        });
                    }
                    WsMessage::Pong(_) => pong_deadline.reset(),
                    WsMessage::Ping(data) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    WsMessage::Close(_) => {
                        tracing::debug!("received close frame");
                        break;
                    }
                    WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Best-effort extraction of a request id from JSON that failed typed parsing.
fn request_id(json: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(json)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_owned))
        .unwrap_or_default()
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid message JSON: {e}");
            let id = request_id(text.as_bytes());
            let _ = sender.send_error_for(&id, WS_ERR_CODE_BAD_REQUEST, "invalid message");
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::Negotiate => handler.on_negotiate(s, msg).await,
        MessageType::Merge => handler.on_merge(s, msg).await,
        MessageType::Ping => handler.on_ping(s, msg).await,
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary WebSocket frame to [`Handler::on_put_chunk`].
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    match parse_binary_message(data) {
        Ok(chunk) => {
            handler
                .on_put_chunk(sender.clone(), chunk.header, chunk.data)
                .await;
        }
        Err(e) => {
            tracing::warn!("failed to parse binary message: {e}");
            let id = data
                .split_first_chunk::<4>()
                .and_then(|(len, rest)| rest.get(..u32::from_be_bytes(*len) as usize))
                .map(request_id)
                .unwrap_or_default();
            let _ = sender.send_error_for(&id, WS_ERR_CODE_BAD_REQUEST, &e.to_string());
        }
    }
}
