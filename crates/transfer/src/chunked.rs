use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chunkup_protocol::Fingerprint;
use chunkup_protocol::constants::MAX_TOTAL_COUNT;
use sha2::{Digest, Sha256};

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Incremental whole-file fingerprint.
///
/// Feeding chunks in index order yields the same fingerprint as hashing the
/// file in one pass.
#[derive(Default)]
pub struct FingerprintHasher {
    hasher: Sha256,
    bytes: u64,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Fingerprint {
        Fingerprint::from_sha256(&self.hasher.finalize())
    }
}

/// Computes the fingerprint of an entire file.
pub fn calculate_file_fingerprint(path: &Path) -> Result<Fingerprint, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = FingerprintHasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Number of chunks a file of `file_size` bytes splits into.
///
/// A zero-byte file has zero chunks.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> Result<u32, TransferError> {
    let chunk_size = chunk_size.max(1) as u64;
    let count = file_size.div_ceil(chunk_size);
    if count > MAX_TOTAL_COUNT as u64 {
        return Err(TransferError::TooManyChunks { count });
    }
    Ok(count as u32)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size, 1-based indexed chunks with SHA-256 checksums.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    chunk_count: u32,
    next_index: u32,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let chunk_count = chunk_count(file_size, chunk_size)?;
        Ok(Self {
            file,
            chunk_size,
            chunk_count,
            next_index: 1,
            file_size,
        })
    }

    /// Reads the next chunk in order. Returns `None` after the last one.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.next_index > self.chunk_count {
            return Ok(None);
        }
        let chunk = self.read_at(self.next_index)?;
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Reads the chunk with the given 1-based index.
    ///
    /// Does not move the sequential cursor used by [`next_chunk`](Self::next_chunk).
    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, TransferError> {
        if index == 0 || index > self.chunk_count {
            return Err(TransferError::InvalidChunkIndex {
                index,
                count: self.chunk_count,
            });
        }
        self.read_at(index)
    }

    fn read_at(&mut self, index: u32) -> Result<Chunk, TransferError> {
        let offset = (index as u64 - 1) * self.chunk_size as u64;
        let len = (self.file_size - offset).min(self.chunk_size as u64) as usize;

        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        self.file.read_exact(&mut data)?;

        let checksum = checksum_bytes(&data);
        Ok(Chunk {
            index,
            data,
            checksum,
        })
    }

    /// Number of chunks in the file.
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// File size in bytes at open time.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Chunks not yet returned by [`next_chunk`](Self::next_chunk).
    pub fn remaining(&self) -> u32 {
        self.chunk_count + 1 - self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[test]
    fn incremental_fingerprint_matches_one_shot() {
        let mut hasher = FingerprintHasher::new();
        hasher.update(b"The quick brown ");
        hasher.update(b"fox");
        assert_eq!(hasher.bytes_hashed(), 19);

        let fp = hasher.finalize();
        assert_eq!(fp.as_str(), checksum_bytes(b"The quick brown fox"));
    }

    #[test]
    fn empty_fingerprint_is_sha256_of_nothing() {
        let fp = FingerprintHasher::new().finalize();
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_fingerprint_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for fingerprint";
        let path = create_test_file(dir.path(), "test.bin", data);

        let fp = calculate_file_fingerprint(&path).unwrap();
        assert_eq!(fp.as_str(), checksum_bytes(data));
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 4).unwrap(), 0);
        assert_eq!(chunk_count(1, 4).unwrap(), 1);
        assert_eq!(chunk_count(4, 4).unwrap(), 1);
        assert_eq!(chunk_count(5, 4).unwrap(), 2);
        assert!(matches!(
            chunk_count(u64::MAX, 1),
            Err(TransferError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.chunk_count(), 3);
        assert_eq!(reader.remaining(), 3);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.index, 1);
        assert_eq!(&c1.data, b"AABB");
        assert_eq!(c1.checksum, checksum_bytes(b"AABB"));

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.index, 2);
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c3.index, 3);
        assert_eq!(&c3.data, b"EE");
        assert_eq!(reader.remaining(), 0);

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_random_access() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        let c = reader.read_chunk(3).unwrap();
        assert_eq!(&c.data, b"89");
        let c = reader.read_chunk(2).unwrap();
        assert_eq!(&c.data, b"4567");

        // Sequential cursor is untouched by random reads.
        assert_eq!(reader.next_chunk().unwrap().unwrap().index, 1);

        assert!(matches!(
            reader.read_chunk(0),
            Err(TransferError::InvalidChunkIndex { index: 0, count: 3 })
        ));
        assert!(matches!(
            reader.read_chunk(4),
            Err(TransferError::InvalidChunkIndex { index: 4, count: 3 })
        ));
    }

    #[test]
    fn chunk_reader_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.chunk_count(), 0);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_default_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"x");
        let reader = ChunkReader::new(&path, 0).unwrap();
        assert_eq!(reader.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(reader.chunk_count(), 1);
    }

    #[test]
    fn chunks_concatenate_to_original() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "test.txt", original);

        let mut reader = ChunkReader::new(&path, 10).unwrap();
        let mut joined = Vec::new();
        let mut hasher = FingerprintHasher::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            hasher.update(&chunk.data);
            joined.extend_from_slice(&chunk.data);
        }

        assert_eq!(&joined, original);
        assert_eq!(hasher.finalize(), calculate_file_fingerprint(&path).unwrap());
    }
}
