use std::sync::Arc;

use serde::Deserialize;

use chunkwise_core::{RetryProfiles, UploadCoordinator};
use chunkwise_objectstore::S3Config;

use super::chunks::ObjectChunkStore;
use super::errors::Result;
use super::metadata::PostgresConfig;
use super::notifications::{SqsConfig, SqsNotifier};
use super::sessions::PgSessionStore;

/// Chunks in S3, sessions in Postgres, notifications on SQS.
#[derive(Clone, Deserialize)]
pub struct PgS3SqsConfig {
    postgres: PostgresConfig,
    s3: S3Config,
    sqs: SqsConfig,
}

impl PgS3SqsConfig {
    pub async fn get_backend(&self, retry: RetryProfiles) -> Result<PgS3SqsBackend> {
        Ok(PgS3SqsBackend {
            chunks: ObjectChunkStore::new(Arc::new(self.s3.new_objects().await?), retry),
            sessions: PgSessionStore::new(self.postgres.new_metadata().await?, retry),
            notifier: self.sqs.new_notifier(retry).await?,
        })
    }
}

#[derive(Clone)]
pub struct PgS3SqsBackend {
    pub chunks: ObjectChunkStore,
    pub sessions: PgSessionStore,
    pub notifier: SqsNotifier,
}

impl PgS3SqsBackend {
    pub fn into_coordinator(self) -> UploadCoordinator {
        UploadCoordinator::new(
            Arc::new(self.chunks),
            Arc::new(self.sessions),
            Arc::new(self.notifier),
        )
    }
}
