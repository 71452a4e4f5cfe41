//! Single writer for the client socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Forwards queued frames to the socket in order, then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = write_rx.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let closing = matches!(frame, tungstenite::Message::Close(_));
        if let Err(e) = write.send(frame).await {
            error!("WebSocket write error: {e}");
            return;
        }
        if closing {
            debug!("close frame sent");
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
