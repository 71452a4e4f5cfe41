//! [`Handler`] backed by a [`ChunkStore`].

use std::sync::Arc;

use chunkup_protocol::constants::WS_ERR_CODE_BAD_REQUEST;
use chunkup_protocol::messages::{
    MergeRequest, MergeResponse, NegotiateRequest, NegotiateResponse, PutChunkResponse,
};
use chunkup_protocol::{ChunkHeader, Message, MessageType};
use chunkup_store::{ChunkStore, StoreError};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Serves negotiate, chunk and merge requests from one store.
pub struct StoreHandler {
    store: Arc<ChunkStore>,
}

impl StoreHandler {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }
}

/// Parses a request payload, replying 400 on failure.
fn parse_request<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.parse_payload::<T>() {
        Ok(Some(req)) => Some(req),
        Ok(None) => {
            let _ = sender.send_error(msg, WS_ERR_CODE_BAD_REQUEST, "missing payload");
            None
        }
        Err(e) => {
            let message = format!("invalid payload: {e}");
            let _ = sender.send_error(msg, WS_ERR_CODE_BAD_REQUEST, &message);
            None
        }
    }
}

fn send_reply<T: serde::Serialize>(sender: &Sender, id: &str, msg_type: MessageType, payload: &T) {
    match Message::new(id, msg_type, Some(payload)) {
        Ok(reply) => {
            let _ = sender.send_msg(reply);
        }
        Err(e) => error!(?msg_type, "failed to encode reply: {e}"),
    }
}

fn send_store_error(sender: &Sender, id: &str, op: &str, err: &StoreError) {
    if err.is_client_error() {
        warn!(op, code = err.code(), "request rejected: {err}");
    } else {
        error!(op, "storage failure: {err}");
    }
    let _ = sender.send_error_for(id, err.code(), &err.to_string());
}

impl Handler for StoreHandler {
    fn on_negotiate(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<NegotiateRequest>(&sender, &msg) else {
                return;
            };

            match self
                .store
                .negotiate(&req.file_hash, &req.extname, req.total_count, req.chunk_size)
                .await
            {
                Ok(n) => {
                    let resp = NegotiateResponse {
                        status: n.status,
                        needed_indices: n.needed_indices,
                        file_path: n.address,
                    };
                    send_reply(&sender, &msg.id, MessageType::NegotiateResponse, &resp);
                }
                Err(e) => send_store_error(&sender, &msg.id, "negotiate", &e),
            }
        })
    }

    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<MergeRequest>(&sender, &msg) else {
                return;
            };

            match self
                .store
                .merge(&req.file_hash, &req.extname, req.total_count)
                .await
            {
                Ok(outcome) => {
                    info!(
                        fingerprint = %req.file_hash,
                        address = %outcome.address,
                        already_existed = outcome.already_existed,
                        "merge complete"
                    );
                    let resp = MergeResponse {
                        file_path: outcome.address,
                        already_existed: outcome.already_existed,
                    };
                    send_reply(&sender, &msg.id, MessageType::MergeResponse, &resp);
                }
                Err(e) => send_store_error(&sender, &msg.id, "merge", &e),
            }
        })
    }

    fn on_put_chunk(
        &self,
        sender: Sender,
        header: ChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let checksum = Some(header.checksum.as_str()).filter(|c| !c.is_empty());
            match self
                .store
                .put_chunk(
                    &header.file_hash,
                    &header.extname,
                    header.chunk_index,
                    &data,
                    checksum,
                    header.chunk_size,
                )
                .await
            {
                Ok(bytes_written) => {
                    debug!(
                        fingerprint = %header.file_hash,
                        index = header.chunk_index,
                        "chunk acknowledged"
                    );
                    let resp = PutChunkResponse {
                        file_hash: header.file_hash,
                        chunk_index: header.chunk_index,
                        bytes_written,
                    };
                    send_reply(&sender, &header.id, MessageType::PutChunkResponse, &resp);
                }
                Err(e) => send_store_error(&sender, &header.id, "put_chunk", &e),
            }
        })
    }
}
