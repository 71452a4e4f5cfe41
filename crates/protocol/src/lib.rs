pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use binary::{BinaryChunk, ChunkHeader, ParseError, encode_binary_message, parse_binary_message};
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use types::{Extension, Fingerprint, InvalidValue, NegotiationStatus};
