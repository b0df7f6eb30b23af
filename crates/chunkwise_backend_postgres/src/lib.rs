//! Production collaborators for `chunkwise_core`: chunk bytes in S3, upload sessions in Postgres
//! and completion events on an SQS FIFO queue.
mod chunks;
mod config;
mod errors;
mod metadata;
mod notifications;
mod sessions;

pub use chunks::ObjectChunkStore;
pub use config::{PgS3SqsBackend, PgS3SqsConfig};
pub use errors::{Error, Result};
pub use metadata::{PostgresConfig, PostgresMetadataPool};
pub use notifications::{SqsConfig, SqsNotifier};
pub use sessions::PgSessionStore;
