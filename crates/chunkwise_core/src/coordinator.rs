use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::chunk_digest::ChunkDigest;
use crate::errors::{Error, UploadError};
use crate::health::{self, Readiness};
use crate::registry::{ChunkStore, SessionStore, UploadNotifier};
use crate::session::{ChunkKey, UploadId};

/// Stage of a single chunk upload request; carried in errors and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStage {
    Validating,
    LoadingSession,
    StoringBlob,
    UpdatingSession,
    Finalizing,
    Notifying,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Validating => "validating",
            UploadStage::LoadingSession => "loading_session",
            UploadStage::StoringBlob => "storing_blob",
            UploadStage::UpdatingSession => "updating_session",
            UploadStage::Finalizing => "finalizing",
            UploadStage::Notifying => "notifying",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound chunk exactly as the transport received it.
#[derive(Clone, Debug)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub chunk_id: String,
    pub chunk_hash: Option<String>,
    pub body: Bytes,
}

/// Outcome of a successfully accounted chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub upload_id: UploadId,
    pub chunk_index: u32,
    pub chunk_key: ChunkKey,
    /// Whether this request completed the upload and sent its notification.
    pub finalized: bool,
}

struct ValidatedChunk {
    upload_id: UploadId,
    chunk_index: u32,
    body: Bytes,
}

fn parse_chunk_index(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn validate(request: ChunkUpload) -> Result<ValidatedChunk, UploadError> {
    let upload_id = UploadId::try_from(request.upload_id.as_str())
        .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;

    let chunk_index = parse_chunk_index(&request.chunk_id).ok_or_else(|| {
        UploadError::InvalidRequest(format!("invalid chunk id: {}", request.chunk_id))
    })?;

    let declared = match request.chunk_hash.as_deref() {
        Some(h) => ChunkDigest::try_from(h).map_err(|e| UploadError::InvalidRequest(e.to_string()))?,
        None => {
            return Err(UploadError::InvalidRequest(String::from(
                "missing X-Chunk-Hash header",
            )))
        }
    };

    if request.body.is_empty() {
        return Err(UploadError::InvalidRequest(String::from("empty chunk body")));
    }

    let computed = ChunkDigest::from_bytes(&request.body);
    if computed != declared {
        tracing::warn!(
            declared = %declared,
            computed = %computed,
            "chunk body does not match declared hash"
        );
        return Err(UploadError::IntegrityMismatch {
            upload_id: upload_id.to_string(),
            chunk_index,
        });
    }

    Ok(ValidatedChunk {
        upload_id,
        chunk_index,
        body: request.body,
    })
}

/// Orchestrates a chunk upload across the chunk store, the session store and the completion
/// notifier.
///
/// Holds no mutable state of its own. Cloning is cheap and every clone shares the same
/// collaborators.
#[derive(Clone)]
pub struct UploadCoordinator {
    chunks: Arc<dyn ChunkStore>,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn UploadNotifier>,
}

impl UploadCoordinator {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn UploadNotifier>,
    ) -> Self {
        Self {
            chunks,
            sessions,
            notifier,
        }
    }

    /// Validate, store and account one chunk, finalizing the upload and emitting its
    /// completion notification if this chunk completed it.
    ///
    /// Nothing is written unless the request is well-formed, its body matches the declared
    /// hash, and a session exists whose chunk count covers the chunk index. After that, every
    /// effect is either an idempotent overwrite or gated by [`SessionStore::try_finalize`], so
    /// the whole request may be retried after any error.
    #[tracing::instrument(
        skip_all,
        fields(upload_id = %request.upload_id, chunk_id = %request.chunk_id)
    )]
    pub async fn upload_chunk(
        &self,
        request: ChunkUpload,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, UploadError> {
        tracing::debug!(stage = %UploadStage::Validating, bytes = request.body.len());
        let ValidatedChunk {
            upload_id,
            chunk_index,
            body,
        } = validate(request)?;
        let id = upload_id.as_str();

        tracing::debug!(stage = %UploadStage::LoadingSession);
        let session = match self.sessions.get_session(&upload_id, cancel).await {
            Ok(s) => s,
            Err(Error::SessionNotFound(_)) => {
                return Err(UploadError::SessionNotFound(upload_id.to_string()))
            }
            Err(e) => {
                return Err(UploadError::stage(
                    UploadStage::LoadingSession,
                    id,
                    chunk_index,
                    e,
                ))
            }
        };
        if chunk_index >= session.total_chunks {
            return Err(UploadError::ChunkOutOfRange {
                upload_id: upload_id.to_string(),
                chunk_index,
                total_chunks: session.total_chunks,
            });
        }

        tracing::debug!(stage = %UploadStage::StoringBlob);
        let chunk_key = ChunkKey::new(&upload_id, chunk_index);
        self.chunks
            .put_chunk(&chunk_key, body, cancel)
            .await
            .map_err(|e| UploadError::stage(UploadStage::StoringBlob, id, chunk_index, e))?;

        tracing::debug!(stage = %UploadStage::UpdatingSession);
        match self.sessions.add_chunk(&upload_id, chunk_index, cancel).await {
            Ok(()) => {}
            // existence was confirmed by the lookup above
            Err(Error::SessionNotFound(_)) => {
                tracing::warn!("session vanished after lookup, chunk not recorded")
            }
            Err(Error::ChunkOutOfRange { total_chunks, .. }) => {
                return Err(UploadError::ChunkOutOfRange {
                    upload_id: upload_id.to_string(),
                    chunk_index,
                    total_chunks,
                })
            }
            Err(e) => {
                return Err(UploadError::stage(
                    UploadStage::UpdatingSession,
                    id,
                    chunk_index,
                    e,
                ))
            }
        }

        tracing::debug!(stage = %UploadStage::Finalizing);
        let finalized = self
            .sessions
            .try_finalize(&upload_id, session.total_chunks, cancel)
            .await
            .map_err(|e| UploadError::stage(UploadStage::Finalizing, id, chunk_index, e))?;

        if finalized {
            tracing::info!(
                stage = %UploadStage::Notifying,
                total_chunks = session.total_chunks,
                "upload complete"
            );
            if let Err(source) = self.notifier.notify_upload_complete(&upload_id, cancel).await {
                tracing::error!("completion notification failed: {source}");
                return Err(UploadError::NotificationFailed {
                    upload_id: upload_id.to_string(),
                    chunk_index,
                    source,
                });
            }
            tracing::info!("completion notification sent");
        }

        Ok(ChunkReceipt {
            upload_id,
            chunk_index,
            chunk_key,
            finalized,
        })
    }

    /// Probe every collaborator concurrently.
    pub async fn readiness(&self, cancel: &CancellationToken) -> Readiness {
        let (chunks, sessions, notifier) = tokio::join!(
            health::check(&*self.chunks, cancel),
            health::check(&*self.sessions, cancel),
            health::check(&*self.notifier, cancel),
        );
        Readiness::from_components(vec![chunks, sessions, notifier])
    }
}
