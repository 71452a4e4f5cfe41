//! Client upload flow for chunkup.
//!
//! This crate holds the **business logic** of uploading one file to a
//! chunkup server. It has no transport dependency: the application
//! provides a [`ServerConnection`] implementation that bridges to the
//! actual WebSocket client.
//!
//! # Pipeline
//!
//! 1. **Hash**: slice the file on the blocking pool and fingerprint it
//! 2. **Negotiate**: ask the server which chunks it still needs
//! 3. **Upload**: send the missing chunks with bounded concurrency
//! 4. **Merge**: have the server assemble the artifact

pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod types;
pub mod upload;

pub use connection::{ConnectionFuture, ServerConnection};
pub use error::UploadError;
pub use orchestrator::UploadOrchestrator;
pub use types::{DEFAULT_CONCURRENCY, UploadConfig, UploadEvent, UploadOutcome};
pub use upload::FileUpload;
