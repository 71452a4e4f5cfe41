use std::path::PathBuf;
use std::time::Duration;

use chunkup_protocol::constants::DEFAULT_MAX_CHUNK_SIZE;

/// Staging sets untouched for this long are considered abandoned.
pub const DEFAULT_STAGING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Storage settings, passed to [`ChunkStore::new`](crate::ChunkStore::new).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding staging sets and artifacts.
    pub root: PathBuf,
    /// Largest accepted chunk, in bytes.
    pub max_chunk_size: usize,
    /// Re-hash merged output and compare with SHA-256 fingerprints.
    pub verify_fingerprint: bool,
    /// Age after which unmerged staging sets and merge leftovers are swept.
    pub staging_ttl: Duration,
    /// Prefix of public artifact addresses, e.g. `/uploads`.
    pub public_prefix: String,
}

impl StoreConfig {
    /// Default settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            verify_fingerprint: true,
            staging_ttl: DEFAULT_STAGING_TTL,
            public_prefix: "/uploads".into(),
        }
    }
}
