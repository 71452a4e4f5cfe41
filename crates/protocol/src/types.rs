use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a fingerprint or extension fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidValue {
    #[error("invalid fingerprint: {0}")]
    Fingerprint(String),

    #[error("invalid extension: {0}")]
    Extension(String),
}

/// Content hash identifying a file's bytes.
///
/// Always lowercase hex, between 32 and 128 characters. The bundled client
/// produces SHA-256 (64 characters); shorter digests are accepted so older
/// clients can still negotiate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const MIN_LEN: usize = 32;
    pub const MAX_LEN: usize = 128;

    /// Validates and normalizes a hex digest.
    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        let len = value.len();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            return Err(InvalidValue::Fingerprint(format!(
                "length {len} outside {}..={}",
                Self::MIN_LEN,
                Self::MAX_LEN
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidValue::Fingerprint(format!("not hex: {value}")));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Wraps a finished SHA-256 digest.
    pub fn from_sha256(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the digest has the length of a SHA-256 hash.
    pub fn is_sha256(&self) -> bool {
        self.0.len() == 64
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File extension of an artifact, without the leading dot.
///
/// 1 to 16 ASCII alphanumerics, stored lowercase. Anything else (dots,
/// slashes, unicode) is rejected so it can be used directly in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Extension(String);

impl Extension {
    pub const MAX_LEN: usize = 16;

    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        let trimmed = value.strip_prefix('.').unwrap_or(value);
        if trimmed.is_empty() || trimmed.len() > Self::MAX_LEN {
            return Err(InvalidValue::Extension(format!(
                "length must be 1..={}",
                Self::MAX_LEN
            )));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(InvalidValue::Extension(format!(
                "only ASCII letters and digits allowed: {value}"
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Derives the extension from a file name (`movie.MP4` -> `mp4`).
    ///
    /// Files without an extension map to `bin`.
    pub fn from_file_name(name: &str) -> Result<Self, InvalidValue> {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Self::parse(ext),
            _ => Self::parse("bin"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Extension {
    type Error = InvalidValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Extension> for String {
    fn from(value: Extension) -> Self {
        value.0
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a negotiate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationStatus {
    /// The artifact already exists; nothing to upload or merge.
    #[serde(rename = "complete")]
    Complete,
    /// Every chunk is staged but the artifact was never assembled.
    #[serde(rename = "ready_to_merge")]
    ReadyToMerge,
    /// Some chunks are staged; upload the rest.
    #[serde(rename = "resume")]
    Resume,
    /// Nothing is staged yet.
    #[serde(rename = "fresh")]
    Fresh,
}

impl NegotiationStatus {
    /// Returns `true` if the client has chunks to send.
    pub fn needs_upload(self) -> bool {
        matches!(self, Self::Resume | Self::Fresh)
    }
}
