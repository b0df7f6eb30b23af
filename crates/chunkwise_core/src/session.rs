use std::collections::BTreeSet;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Client-supplied identifier of an upload.
///
/// Upload ids end up inside blob keys (see [`ChunkKey`]) so they are restricted to the
/// characters `[A-Za-z0-9._-]`, at most 128 of them, and may not consist solely of dots.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId(String);

impl TryFrom<&str> for UploadId {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,128}$").unwrap());

        if !RE.is_match(s) || s.chars().all(|c| c == '.') {
            return Err(Error::InvalidUploadId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl FromStr for UploadId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UploadId::try_from(s)
    }
}

impl UploadId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Queue deduplication id for this upload's completion event. Fixed per upload so that any
    /// resend of the event collapses onto the first one.
    pub fn deduplication_id(&self) -> String {
        format!("dedup-{}", self.0)
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of an [`UploadSession`]. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Completed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Completed => "completed",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "in_progress" => Ok(UploadStatus::InProgress),
            "completed" => Ok(UploadStatus::Completed),
            s => Err(format!("unknown upload status: {s}")),
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the metadata record tracking one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub total_chunks: u32,
    pub uploaded_chunks: BTreeSet<u32>,
    pub status: UploadStatus,
}

impl UploadSession {
    /// A freshly registered session with no chunks.
    pub fn new(upload_id: UploadId, total_chunks: u32) -> Self {
        Self {
            upload_id,
            total_chunks,
            uploaded_chunks: BTreeSet::new(),
            status: UploadStatus::Pending,
        }
    }

    #[inline]
    pub fn all_chunks_received(&self) -> bool {
        self.uploaded_chunks.len() as u64 == self.total_chunks as u64
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }
}

/// Deterministic blob key for a chunk: `uploads/{upload_id}/chunk_{index}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    key: String,
}

impl ChunkKey {
    pub fn new(upload_id: &UploadId, chunk_index: u32) -> Self {
        Self {
            key: format!("uploads/{}/chunk_{}", upload_id, chunk_index),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl From<&ChunkKey> for String {
    fn from(k: &ChunkKey) -> String {
        k.key.clone()
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}
