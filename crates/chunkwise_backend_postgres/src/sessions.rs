use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chunkwise_core::registry::{ReadinessCheck, SessionStore};
use chunkwise_core::{RetryProfiles, UploadId, UploadSession};

use super::errors::{Error, Result};
use super::metadata::{AddChunkOutcome, PostgresMetadataPool};

/// [`SessionStore`] backed by the `upload_sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    metadata: PostgresMetadataPool,
    retry: RetryProfiles,
}

impl PgSessionStore {
    pub fn new(metadata: PostgresMetadataPool, retry: RetryProfiles) -> Self {
        Self { metadata, retry }
    }

    /// Create a `pending` session unless one already exists for `upload_id`. Returns whether a
    /// row was inserted.
    pub async fn register_session(&self, upload_id: &UploadId, total_chunks: u32) -> Result<bool> {
        let created = self
            .metadata
            .get_conn()
            .await?
            .insert_session(upload_id, total_chunks)
            .await?;
        if created {
            tracing::info!(%upload_id, total_chunks, "registered upload session");
        }
        Ok(created)
    }
}

#[async_trait]
impl ReadinessCheck for PgSessionStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn probe(&self, cancel: &CancellationToken) -> chunkwise_core::Result<()> {
        let metadata = &self.metadata;
        self.retry
            .probe
            .run(
                cancel,
                move || async move { metadata.get_conn().await?.ping().await },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get_session(
        &self,
        upload_id: &UploadId,
        cancel: &CancellationToken,
    ) -> chunkwise_core::Result<UploadSession> {
        let metadata = &self.metadata;
        let session = self
            .retry
            .data
            .run(
                cancel,
                move || async move { metadata.get_conn().await?.get_session(upload_id).await },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        Ok(session.ok_or_else(|| Error::SessionNotFound(upload_id.to_string()))?)
    }

    async fn add_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u32,
        cancel: &CancellationToken,
    ) -> chunkwise_core::Result<()> {
        let metadata = &self.metadata;
        let outcome = self
            .retry
            .data
            .run(
                cancel,
                move || async move {
                    metadata
                        .get_conn()
                        .await?
                        .add_chunk(upload_id, chunk_index)
                        .await
                },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;

        match outcome {
            AddChunkOutcome::Added => Ok(()),
            AddChunkOutcome::AlreadyCompleted => {
                tracing::debug!(%upload_id, chunk_index, "session already completed");
                Ok(())
            }
            AddChunkOutcome::OutOfRange(total_chunks) => Err(Error::ChunkOutOfRange {
                chunk_index,
                total_chunks,
            }
            .into()),
            AddChunkOutcome::NotFound => Err(Error::SessionNotFound(upload_id.to_string()).into()),
        }
    }

    async fn try_finalize(
        &self,
        upload_id: &UploadId,
        total_chunks: u32,
        cancel: &CancellationToken,
    ) -> chunkwise_core::Result<bool> {
        // one token per logical call, shared by its retries
        let token = Uuid::new_v4().to_string();
        let token = token.as_str();
        let metadata = &self.metadata;
        Ok(self
            .retry
            .data
            .run(
                cancel,
                move || async move {
                    metadata
                        .get_conn()
                        .await?
                        .try_finalize(upload_id, total_chunks, token)
                        .await
                },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?)
    }
}
