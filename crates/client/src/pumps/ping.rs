//! Keepalive pings for an idle upload connection.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use chunkup_protocol::constants::WS_PING_PERIOD;

/// Queues a WebSocket ping every [`WS_PING_PERIOD`] until cancelled or
/// the write side goes away.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if write_tx.send(tungstenite::Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn ping_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn ping_pump_sends_after_one_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, cancel.clone()));

        let first = rx.recv().await;
        assert!(matches!(first, Some(tungstenite::Message::Ping(_))));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ping_pump_stops_when_writer_gone() {
        tokio::time::pause();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        ping_pump(tx, CancellationToken::new()).await;
    }
}
