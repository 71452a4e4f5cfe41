//! One file's upload: hash, negotiate, send missing chunks, merge.

use std::future::Future;
use std::path::{Path, PathBuf};

use chunkup_protocol::messages::{
    MergeRequest, MergeResponse, NegotiateRequest, NegotiateResponse, PutChunkResponse,
};
use chunkup_protocol::{ChunkHeader, Extension, Message, MessageType, NegotiationStatus};
use chunkup_transfer::{
    ChunkReader, FileManifest, ProgressTracker, SpeedCalculator, TransferError, TransferSession,
    spawn_slicer,
};
use futures_util::{StreamExt, stream};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ServerConnection;
use crate::error::UploadError;
use crate::types::{UploadConfig, UploadEvent, UploadOutcome};

/// Runs the upload pipeline for one file against one server.
pub struct FileUpload<'a> {
    conn: &'a dyn ServerConnection,
    cancel: CancellationToken,
}

/// Everything a chunk upload needs to know about its file.
struct ChunkContext<'m> {
    path: PathBuf,
    extension: Extension,
    manifest: &'m FileManifest,
}

impl<'a> FileUpload<'a> {
    pub fn new(conn: &'a dyn ServerConnection, cancel: CancellationToken) -> Self {
        Self { conn, cancel }
    }

    /// Uploads `config.path` and returns where the server published it.
    ///
    /// Progress events are sent via `events_tx`. The first `Progress`
    /// event reflects the chunks the server already held.
    pub async fn run(
        &self,
        config: &UploadConfig,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, UploadError> {
        self.check_cancelled()?;
        let extension = config.resolve_extension()?;
        let chunk_size = config.checked_chunk_size()?;

        // 1. Hash
        emit(events_tx, UploadEvent::Hashing { path: config.path.clone() }).await;
        let slicer = spawn_slicer(config.path.clone(), chunk_size);
        let manifest = self
            .cancellable(async move { Ok(slicer.collect_manifest().await?) })
            .await?;
        debug!(
            server = %self.conn.server_id(),
            fingerprint = %manifest.fingerprint,
            chunks = manifest.total_count,
            bytes = manifest.file_size,
            "file hashed"
        );
        emit(
            events_tx,
            UploadEvent::Hashed {
                fingerprint: manifest.fingerprint.clone(),
                total_count: manifest.total_count,
                file_size: manifest.file_size,
            },
        )
        .await;

        // 2. Negotiate
        let session = TransferSession::new(manifest.fingerprint.clone(), manifest.total_count);
        let negotiated = self
            .cancellable(self.negotiate(&manifest, &extension))
            .await?;
        emit(
            events_tx,
            UploadEvent::Negotiated {
                status: negotiated.status,
                needed: negotiated.needed_indices.len() as u32,
                total_count: manifest.total_count,
            },
        )
        .await;

        if negotiated.status == NegotiationStatus::Complete {
            let address = negotiated.file_path.ok_or_else(|| {
                UploadError::Protocol("complete negotiation without an address".into())
            })?;
            session.complete();
            info!(fingerprint = %manifest.fingerprint, %address, "already uploaded");
            emit(events_tx, progress_event(100, 0, 0.0)).await;
            return Ok(UploadOutcome {
                fingerprint: manifest.fingerprint,
                extension,
                address,
                total_count: manifest.total_count,
                status: negotiated.status,
                chunks_sent: 0,
                bytes_sent: 0,
                already_existed: true,
            });
        }

        validate_needed(&negotiated.needed_indices, manifest.total_count)?;
        session.set_needed(&negotiated.needed_indices);

        // 3. Upload
        let mut tracker = ProgressTracker::new(manifest.total_count, session.present_count());
        emit(events_tx, progress_event(tracker.percent(), 0, 0.0)).await;

        let ctx = ChunkContext {
            path: config.path.clone(),
            extension: extension.clone(),
            manifest: &manifest,
        };
        let result = self
            .upload_chunks(&ctx, &session, &mut tracker, config.concurrency, events_tx)
            .await;
        if let Err(e) = result {
            if matches!(e, UploadError::Cancelled) {
                session.cancel();
            } else {
                session.fail(&e.to_string());
            }
            return Err(e);
        }

        // 4. Merge
        session.begin_merge();
        emit(events_tx, UploadEvent::Merging).await;
        let merged = self
            .cancellable(self.merge(&manifest, &extension))
            .await
            .inspect_err(|e| session.fail(&e.to_string()))?;
        session.complete();

        info!(
            fingerprint = %manifest.fingerprint,
            address = %merged.file_path,
            elapsed_ms = session.elapsed().as_millis() as u64,
            "upload complete"
        );

        Ok(UploadOutcome {
            fingerprint: manifest.fingerprint.clone(),
            extension,
            address: merged.file_path,
            total_count: manifest.total_count,
            status: negotiated.status,
            chunks_sent: negotiated.needed_indices.len() as u32,
            bytes_sent: session.bytes_confirmed(),
            already_existed: merged.already_existed,
        })
    }

    async fn negotiate(
        &self,
        manifest: &FileManifest,
        extension: &Extension,
    ) -> Result<NegotiateResponse, UploadError> {
        let req = NegotiateRequest {
            file_hash: manifest.fingerprint.clone(),
            total_count: manifest.total_count,
            extname: extension.clone(),
            chunk_size: manifest.chunk_size as u64,
        };
        let payload = serde_json::to_value(&req)?;
        let resp = self
            .conn
            .send_request(MessageType::Negotiate, &payload)
            .await?;
        expect_payload(resp, "negotiate")
    }

    async fn merge(
        &self,
        manifest: &FileManifest,
        extension: &Extension,
    ) -> Result<MergeResponse, UploadError> {
        let req = MergeRequest {
            file_hash: manifest.fingerprint.clone(),
            extname: extension.clone(),
            total_count: manifest.total_count,
        };
        let payload = serde_json::to_value(&req)?;
        let resp = self.conn.send_request(MessageType::Merge, &payload).await?;
        expect_payload(resp, "merge")
    }

    /// Sends every outstanding chunk, at most `concurrency` at a time.
    ///
    /// The first failure abandons the chunks still in flight.
    async fn upload_chunks(
        &self,
        ctx: &ChunkContext<'_>,
        session: &TransferSession,
        tracker: &mut ProgressTracker,
        concurrency: usize,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<(), UploadError> {
        let speed = SpeedCalculator::default();
        let mut uploads = std::pin::pin!(
            stream::iter(session.needed())
                .map(|index| self.upload_chunk(ctx, index))
                .buffer_unordered(concurrency.max(1))
        );

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                next = uploads.next() => next,
            };
            let Some(result) = next else {
                return Ok(());
            };
            let (index, bytes) = result?;

            if !session.confirm_chunk(index, bytes) {
                warn!(index, "duplicate chunk acknowledgement");
                continue;
            }
            speed.add_sample(bytes);
            let percent = tracker.advance();
            emit(
                events_tx,
                progress_event(percent, session.bytes_confirmed(), speed.bytes_per_second()),
            )
            .await;
        }
    }

    /// Reads one chunk, checks it still matches the hash pass, and sends it.
    async fn upload_chunk(
        &self,
        ctx: &ChunkContext<'_>,
        index: u32,
    ) -> Result<(u32, u64), UploadError> {
        self.send_chunk(ctx, index)
            .await
            .map_err(|e| match e {
                UploadError::Cancelled => UploadError::Cancelled,
                other => UploadError::UploadFailed {
                    index,
                    source: Box::new(other),
                },
            })
    }

    async fn send_chunk(
        &self,
        ctx: &ChunkContext<'_>,
        index: u32,
    ) -> Result<(u32, u64), UploadError> {
        let manifest = ctx.manifest;
        let chunk = read_chunk(&ctx.path, manifest.chunk_size, index).await?;
        if Some(chunk.checksum.as_str()) != manifest.checksum(index)
            || chunk.data.len() as u64 != manifest.chunk_len(index)
        {
            return Err(TransferError::SourceChanged { index }.into());
        }

        let header = ChunkHeader {
            id: String::new(),
            file_hash: manifest.fingerprint.clone(),
            extname: ctx.extension.clone(),
            chunk_index: index,
            checksum: chunk.checksum,
            chunk_size: manifest.chunk_size as u64,
        };
        let header = serde_json::to_value(&header)?;
        let resp = self.conn.send_binary(&header, &chunk.data).await?;
        let ack: PutChunkResponse = expect_payload(resp, "put_chunk")?;

        if ack.chunk_index != index {
            return Err(UploadError::Protocol(format!(
                "acknowledged chunk {} instead of {index}",
                ack.chunk_index
            )));
        }
        debug!(index, bytes = ack.bytes_written, "chunk stored");
        Ok((index, chunk.data.len() as u64))
    }

    /// Runs `fut` unless the upload is cancelled first.
    async fn cancellable<T, F>(&self, fut: F) -> Result<T, UploadError>
    where
        F: Future<Output = Result<T, UploadError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            result = fut => result,
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn read_chunk(
    path: &Path,
    chunk_size: usize,
    index: u32,
) -> Result<chunkup_transfer::Chunk, UploadError> {
    let path = path.to_path_buf();
    let chunk = tokio::task::spawn_blocking(move || {
        let mut reader = ChunkReader::new(&path, chunk_size)?;
        reader.read_chunk(index)
    })
    .await
    .map_err(|e| TransferError::Slicer(format!("chunk read task failed: {e}")))?;
    match chunk {
        Ok(chunk) => Ok(chunk),
        Err(TransferError::InvalidChunkIndex { index, .. }) => {
            Err(TransferError::SourceChanged { index }.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Rejects a needed list that names chunks the file does not have.
fn validate_needed(needed: &[u32], total_count: u32) -> Result<(), UploadError> {
    if let Some(bad) = needed.iter().find(|&&i| i == 0 || i > total_count) {
        return Err(UploadError::Protocol(format!(
            "server asked for chunk {bad} of {total_count}"
        )));
    }
    if needed.windows(2).any(|w| w[0] >= w[1]) {
        return Err(UploadError::Protocol(
            "needed indices are not strictly ascending".into(),
        ));
    }
    Ok(())
}

/// Extracts a typed reply payload.
fn expect_payload<T: DeserializeOwned>(resp: Message, op: &str) -> Result<T, UploadError> {
    if let Some(err) = resp.error {
        return Err(UploadError::Server {
            code: err.code,
            message: err.message,
        });
    }
    resp.parse_payload::<T>()?
        .ok_or_else(|| UploadError::Protocol(format!("empty {op} response")))
}

fn progress_event(percent: u8, bytes_sent: u64, bytes_per_second: f64) -> UploadEvent {
    UploadEvent::Progress {
        percent,
        bytes_sent,
        bytes_per_second,
    }
}

async fn emit(events_tx: &mpsc::Sender<UploadEvent>, event: UploadEvent) {
    let _ = events_tx.send(event).await;
}
