//! Upload error types.

use chunkup_transfer::TransferError;

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// The server answered with an error envelope.
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    /// The transport failed before a reply arrived.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server replied with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A chunk could not be stored; the rest of the run was abandoned.
    #[error("chunk {index} failed: {source}")]
    UploadFailed {
        index: u32,
        #[source]
        source: Box<UploadError>,
    },

    /// The configured chunk size cannot be carried by one message.
    #[error("chunk size {size} exceeds the {max} byte limit")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Whether running the whole sequence again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::ChunkTooLarge { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_failed_names_the_chunk() {
        let err = UploadError::UploadFailed {
            index: 7,
            source: Box::new(UploadError::Server {
                code: 422,
                message: "checksum mismatch".into(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("chunk 7"));
        assert!(text.contains("422"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cancellation_and_oversized_chunks_are_final() {
        assert!(!UploadError::Cancelled.is_retryable());
        assert!(
            !UploadError::ChunkTooLarge {
                size: 64 << 20,
                max: 49 << 20
            }
            .is_retryable()
        );
        assert!(UploadError::Connection("reset".into()).is_retryable());
        assert!(
            UploadError::Server {
                code: 409,
                message: "missing 3".into()
            }
            .is_retryable()
        );
    }
}
