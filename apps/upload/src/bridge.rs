//! Bridge between `WsClient` and the uploader's `ServerConnection` trait.
//!
//! Holds one WebSocket connection and transparently reconnects when it has
//! dropped, so a retried upload starts over on a fresh socket.

use std::sync::Arc;

use chunkup_client::{WsClient, WsError};
use chunkup_protocol::{Message, MessageType};
use chunkup_uploader::{ConnectionFuture, ServerConnection, UploadError};
use tokio::sync::Mutex;

/// [`ServerConnection`] backed by a [`WsClient`].
pub struct WsConnection {
    url: String,
    client: Mutex<Option<Arc<WsClient>>>,
}

impl WsConnection {
    /// Connects to `url` right away so a bad address fails early.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let client = WsClient::connect(url).await?;
        tracing::info!(%url, "connected to server");
        Ok(Self {
            url: url.to_string(),
            client: Mutex::new(Some(Arc::new(client))),
        })
    }

    /// Returns the live client, reconnecting if the last one dropped.
    async fn client(&self) -> Result<Arc<WsClient>, UploadError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref()
            && client.is_connected()
        {
            return Ok(Arc::clone(client));
        }

        tracing::info!(url = %self.url, "reconnecting");
        let client = Arc::new(WsClient::connect(&self.url).await.map_err(into_upload_error)?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Closes the current socket, if any.
    pub async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }
}

fn into_upload_error(err: WsError) -> UploadError {
    match err {
        WsError::Server { code, message } => UploadError::Server { code, message },
        WsError::Json(e) => UploadError::Json(e),
        other => UploadError::Connection(other.to_string()),
    }
}

impl ServerConnection for WsConnection {
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> ConnectionFuture<'_> {
        let payload = payload.clone();
        Box::pin(async move {
            let client = self.client().await?;
            client
                .send_request(msg_type, Some(&payload))
                .await
                .map_err(into_upload_error)
        })
    }

    fn send_binary(&self, header: &serde_json::Value, data: &[u8]) -> ConnectionFuture<'_> {
        let header = header.clone();
        let data = data.to_vec();
        Box::pin(async move {
            let client = self.client().await?;
            let reply: Message = client
                .send_binary(&header, &data)
                .await
                .map_err(into_upload_error)?;
            Ok(reply)
        })
    }

    fn server_id(&self) -> &str {
        &self.url
    }
}
