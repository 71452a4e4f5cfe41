use std::path::{Path, PathBuf};

use chunkup_protocol::{Extension, Fingerprint};

/// Top-level partition an artifact is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Image,
        Self::Video,
        Self::Audio,
        Self::Document,
        Self::Archive,
        Self::Other,
    ];

    pub fn from_extension(ext: &Extension) -> Self {
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" | "ico" | "tif" | "tiff"
            | "heic" | "avif" => Self::Image,
            "mp4" | "mkv" | "mov" | "avi" | "webm" | "flv" | "wmv" | "m4v" | "mpeg" | "mpg" => {
                Self::Video
            }
            "mp3" | "wav" | "flac" | "ogg" | "aac" | "m4a" | "opus" | "wma" => Self::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "ods" | "txt"
            | "md" | "csv" | "rtf" => Self::Document,
            "zip" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "7z" | "rar" | "zst" => Self::Archive,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Archive => "archive",
            Self::Other => "other",
        }
    }
}

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SIZE_TAG: &str = "chunk-size";

/// Staging directory for one fingerprint.
pub(crate) fn staging_dir(root: &Path, fp: &Fingerprint, ext: &Extension) -> PathBuf {
    root.join(Category::from_extension(ext).as_str())
        .join(fp.as_str())
}

pub(crate) fn chunk_path(staging: &Path, index: u32) -> PathBuf {
    staging.join(format!("{CHUNK_PREFIX}{index}"))
}

/// Unique in-flight name for a chunk write. Never matches
/// [`parse_chunk_file_name`].
pub(crate) fn chunk_temp_path(staging: &Path, index: u32) -> PathBuf {
    staging.join(format!("{CHUNK_PREFIX}{index}.{}.part", uuid::Uuid::new_v4()))
}

/// Records the chunk size a staging set was sliced with. Never matches
/// [`parse_chunk_file_name`].
pub(crate) fn chunk_size_tag_path(staging: &Path) -> PathBuf {
    staging.join(CHUNK_SIZE_TAG)
}

pub(crate) fn chunk_size_tag_temp_path(staging: &Path) -> PathBuf {
    staging.join(format!("{CHUNK_SIZE_TAG}.{}.part", uuid::Uuid::new_v4()))
}

pub(crate) fn artifact_file_name(fp: &Fingerprint, ext: &Extension) -> String {
    format!("{fp}.{ext}")
}

pub(crate) fn artifact_path(root: &Path, fp: &Fingerprint, ext: &Extension) -> PathBuf {
    root.join(Category::from_extension(ext).as_str())
        .join(artifact_file_name(fp, ext))
}

/// Unique in-flight name for a merge, next to the final artifact.
pub(crate) fn merge_temp_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
    artifact.with_file_name(name)
}

/// Public address under which an artifact is served.
pub(crate) fn public_address(prefix: &str, fp: &Fingerprint, ext: &Extension) -> String {
    format!(
        "{}/{}/{}",
        prefix.trim_end_matches('/'),
        Category::from_extension(ext).as_str(),
        artifact_file_name(fp, ext)
    )
}

/// Parses a staged chunk file name (`chunk-{index}`).
///
/// Only canonical names match: no leading zeros, no suffix, index above 0.
/// In-flight `.part` files are therefore ignored.
pub fn parse_chunk_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(CHUNK_PREFIX)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}
