use std::path::PathBuf;

use chunkup_protocol::Fingerprint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::TransferError;
use crate::chunked::{ChunkReader, FingerprintHasher};
use crate::types::{Chunk, FileManifest};

/// Chunks buffered between the reading thread and the consumer.
///
/// Bounds memory to roughly `SLICE_QUEUE_DEPTH * chunk_size` no matter how
/// large the file is.
pub const SLICE_QUEUE_DEPTH: usize = 4;

/// Output of a slicing pass.
#[derive(Debug)]
pub enum SliceEvent {
    /// The next chunk, in index order.
    Chunk(Chunk),
    /// All chunks were emitted; the fingerprint covers the whole file.
    Done {
        fingerprint: Fingerprint,
        total_count: u32,
        file_size: u64,
        chunk_size: usize,
    },
}

/// Receiving side of a running slicer.
pub struct SliceStream {
    rx: mpsc::Receiver<Result<SliceEvent, TransferError>>,
    task: JoinHandle<()>,
    finished: bool,
}

/// Starts slicing `path` on the blocking pool.
///
/// Chunks arrive in index order, followed by exactly one
/// [`SliceEvent::Done`]. Dropping the stream stops the reader at the next
/// chunk boundary.
pub fn spawn_slicer(path: PathBuf, chunk_size: usize) -> SliceStream {
    let (tx, rx) = mpsc::channel(SLICE_QUEUE_DEPTH);
    let task = tokio::task::spawn_blocking(move || {
        if let Err(e) = slice_file(&path, chunk_size, &tx) {
            let _ = tx.blocking_send(Err(e));
        }
    });
    SliceStream {
        rx,
        task,
        finished: false,
    }
}

fn slice_file(
    path: &std::path::Path,
    chunk_size: usize,
    tx: &mpsc::Sender<Result<SliceEvent, TransferError>>,
) -> Result<(), TransferError> {
    let mut reader = ChunkReader::new(path, chunk_size)?;
    let mut hasher = FingerprintHasher::new();
    debug!(
        path = %path.display(),
        size = reader.file_size(),
        chunks = reader.chunk_count(),
        "slicing file"
    );

    while let Some(chunk) = reader.next_chunk()? {
        hasher.update(&chunk.data);
        if tx.blocking_send(Ok(SliceEvent::Chunk(chunk))).is_err() {
            debug!(path = %path.display(), "slice consumer dropped, stopping");
            return Ok(());
        }
    }

    let done = SliceEvent::Done {
        fingerprint: hasher.finalize(),
        total_count: reader.chunk_count(),
        file_size: reader.file_size(),
        chunk_size: reader.chunk_size(),
    };
    let _ = tx.blocking_send(Ok(done));
    Ok(())
}

impl SliceStream {
    /// Returns the next event, or `None` once `Done` has been delivered.
    pub async fn next(&mut self) -> Result<Option<SliceEvent>, TransferError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(event)) => {
                if matches!(event, SliceEvent::Done { .. }) {
                    self.finished = true;
                }
                Ok(Some(event))
            }
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Err(TransferError::Slicer(
                    "reader stopped before the last chunk".into(),
                ))
            }
        }
    }

    /// Drains the stream into a manifest, discarding chunk data.
    pub async fn collect_manifest(mut self) -> Result<FileManifest, TransferError> {
        let mut checksums = Vec::new();
        loop {
            match self.next().await? {
                Some(SliceEvent::Chunk(chunk)) => {
                    if chunk.index as usize != checksums.len() + 1 {
                        return Err(TransferError::Slicer(format!(
                            "chunk {} arrived out of order",
                            chunk.index
                        )));
                    }
                    checksums.push(chunk.checksum);
                }
                Some(SliceEvent::Done {
                    fingerprint,
                    total_count,
                    file_size,
                    chunk_size,
                }) => {
                    if checksums.len() != total_count as usize {
                        return Err(TransferError::Slicer(format!(
                            "expected {total_count} chunks, got {}",
                            checksums.len()
                        )));
                    }
                    return Ok(FileManifest {
                        fingerprint,
                        total_count,
                        file_size,
                        chunk_size,
                        checksums,
                    });
                }
                None => {
                    return Err(TransferError::Slicer("stream already finished".into()));
                }
            }
        }
    }

    /// Returns `true` once the reading task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
