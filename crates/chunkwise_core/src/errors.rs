use thiserror;

use crate::coordinator::UploadStage;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned across the collaborator contracts in [`crate::registry`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),
    #[error("invalid chunk hash: {0}")]
    InvalidChunkHash(String),

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("chunk index {chunk_index} out of range for upload with {total_chunks} chunks")]
    ChunkOutOfRange { chunk_index: u32, total_chunks: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("backend error: {0}")]
    BackendError(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by [`crate::UploadCoordinator::upload_chunk`].
///
/// Variants are split by remedy: the first four are the client's fault and must not be retried
/// as-is, [`UploadError::StageFailed`] means the chunk may not have landed and the whole request
/// can be retried, and [`UploadError::NotificationFailed`] means the chunk is stored and
/// accounted but the completion signal has to be re-driven.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("chunk {chunk_index} of upload {upload_id} does not match its declared hash")]
    IntegrityMismatch { upload_id: String, chunk_index: u32 },

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("chunk {chunk_index} of upload {upload_id} out of range ({total_chunks} chunks)")]
    ChunkOutOfRange {
        upload_id: String,
        chunk_index: u32,
        total_chunks: u32,
    },

    #[error("{stage} failed for chunk {chunk_index} of upload {upload_id}: {source}")]
    StageFailed {
        stage: UploadStage,
        upload_id: String,
        chunk_index: u32,
        #[source]
        source: Error,
    },

    #[error("chunk {chunk_index} of upload {upload_id} stored but completion notification failed: {source}")]
    NotificationFailed {
        upload_id: String,
        chunk_index: u32,
        #[source]
        source: Error,
    },
}

impl UploadError {
    pub(crate) fn stage(stage: UploadStage, upload_id: &str, chunk_index: u32, source: Error) -> Self {
        UploadError::StageFailed {
            stage,
            upload_id: upload_id.to_string(),
            chunk_index,
            source,
        }
    }

    /// True when the failure was caused by the request's cancellation token firing.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            UploadError::StageFailed {
                source: Error::Cancelled,
                ..
            } | UploadError::NotificationFailed {
                source: Error::Cancelled,
                ..
            }
        )
    }
}
