//! WebSocket read pump: routes replies to waiting requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkup_protocol::Message;
use chunkup_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

use crate::ws_client::PendingMap;

/// Reads messages from the WebSocket and resolves pending requests.
///
/// Any inbound frame resets the liveness deadline; if nothing arrives
/// within [`WS_PONG_WAIT`] the connection is considered dead. On exit,
/// `closed` is set and every pending request fails with `Closed`.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout, connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, &pending).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => trace!("received pong"),
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let dropped = {
        let mut map = pending.lock().await;
        let n = map.len();
        map.clear();
        n
    };
    if dropped > 0 {
        warn!(dropped, "connection ended with requests in flight");
    }
}

/// Hands a text reply to the request waiting for its id.
async fn handle_text_message(text: &str, pending: &PendingMap) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    let waiter = pending.lock().await.remove(&msg.id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => warn!(
            msg_type = ?msg.msg_type,
            id = %msg.id,
            "reply for unknown request, dropping"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkup_protocol::constants::MessageType;
    use futures_util::stream;
    use std::collections::HashMap;
    use tokio::sync::{Mutex, oneshot};

    fn new_pending() -> PendingMap {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[tokio::test]
    async fn handle_text_routes_response_to_pending() {
        let pending = new_pending();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("req-1".into(), tx);

        let msg = Message::new::<()>("req-1", MessageType::Pong, None).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        handle_text_message(&json, &pending).await;

        let resp = rx.await.unwrap();
        assert_eq!(resp.id, "req-1");
        assert_eq!(resp.msg_type, MessageType::Pong);
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn handle_text_drops_unknown_ids() {
        let pending = new_pending();
        let (tx, _rx) = oneshot::channel();
        pending.lock().await.insert("req-1".into(), tx);

        let msg = Message::new::<()>("other", MessageType::Pong, None).unwrap();
        handle_text_message(&serde_json::to_string(&msg).unwrap(), &pending).await;
        assert_eq!(pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn handle_text_ignores_malformed_json() {
        let pending = new_pending();
        handle_text_message("not valid json {{{", &pending).await;
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn read_pump_fails_pending_on_stream_end() {
        let pending = new_pending();
        let (tx, rx) = oneshot::channel::<Message>();
        pending.lock().await.insert("req-1".into(), tx);
        let closed = Arc::new(AtomicBool::new(false));
        let (write_tx, _write_rx) = mpsc::channel(16);

        let empty = stream::empty::<Result<tungstenite::Message, tungstenite::Error>>();
        read_pump(
            empty,
            pending.clone(),
            closed.clone(),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(closed.load(Ordering::SeqCst));
        assert!(rx.await.is_err());
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn read_pump_timeout_on_silence() {
        tokio::time::pause();

        let closed = Arc::new(AtomicBool::new(false));
        let (write_tx, _write_rx) = mpsc::channel(16);
        let silent = stream::pending::<Result<tungstenite::Message, tungstenite::Error>>();

        read_pump(
            silent,
            new_pending(),
            closed.clone(),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(closed.load(Ordering::SeqCst), "should close on pong timeout");
    }

    #[tokio::test]
    async fn read_pump_answers_ping() {
        let (write_tx, mut write_rx) = mpsc::channel(16);
        let frames = stream::iter(vec![Ok(tungstenite::Message::Ping(vec![1, 2].into()))]);

        read_pump(
            frames,
            new_pending(),
            Arc::new(AtomicBool::new(false)),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        match write_rx.recv().await {
            Some(tungstenite::Message::Pong(data)) => assert_eq!(data.as_ref(), &[1, 2]),
            other => panic!("expected pong, got {other:?}"),
        }
    }
}
