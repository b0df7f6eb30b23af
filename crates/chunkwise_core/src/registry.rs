//! # Collaborator Contracts
//!
//! The [`crate::UploadCoordinator`] talks to three backends, each of which is reached through
//! one of the traits defined here:
//!
//! * [`ChunkStore`]: durable, overwrite-safe storage for chunk bytes.
//! * [`SessionStore`]: the per-upload metadata record. Its mutations must be evaluated
//!   atomically by the backend; see the method docs for the exact conditions.
//! * [`UploadNotifier`]: the downstream queue that receives completion events.
//!
//! All three extend [`ReadinessCheck`] so an operator-facing readiness endpoint can probe them.
//!
//! Every method takes the request's [`CancellationToken`]. Implementations are expected to run
//! their I/O through a [`crate::RetryPolicy`] with that token so a cancelled request stops
//! retrying and returns [`crate::Error::Cancelled`].
//!
//! ## Known Implementations
//!
//! * `chunkwise_backend_postgres`: S3 chunks, Postgres sessions and SQS FIFO notifications.
//! * [`crate::memory`]: in-process implementations with failure injection, for tests.
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::session::{ChunkKey, UploadId, UploadSession};

/// Lightweight reachability probe used for readiness reporting.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Component name shown in readiness reports.
    fn name(&self) -> &'static str;

    async fn probe(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Storage for chunk bytes.
#[async_trait]
pub trait ChunkStore: ReadinessCheck + 'static {
    /// Write `bytes` under `key`. Writing the same key twice overwrites; it never appends.
    async fn put_chunk(&self, key: &ChunkKey, bytes: Bytes, cancel: &CancellationToken)
        -> Result<()>;
}

/// Upload session metadata backed by a store with atomic conditional writes.
#[async_trait]
pub trait SessionStore: ReadinessCheck + 'static {
    /// Point read. Returns [`crate::Error::SessionNotFound`] if no session was registered.
    async fn get_session(
        &self,
        upload_id: &UploadId,
        cancel: &CancellationToken,
    ) -> Result<UploadSession>;

    /// Atomically add `chunk_index` to the session's chunk set and mark it `in_progress`.
    ///
    /// * adding an index that is already present changes nothing;
    /// * a `completed` session is left untouched and the call succeeds;
    /// * an index outside `[0, total_chunks)` fails with [`crate::Error::ChunkOutOfRange`];
    /// * a missing session fails with [`crate::Error::SessionNotFound`].
    ///
    /// Concurrent calls for different indices must never lose an update.
    async fn add_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u32,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Atomically move the session to `completed` if it holds exactly `total_chunks` chunks and
    /// is not already completed.
    ///
    /// Returns `true` for exactly one caller per session. Losing the race is not an error.
    async fn try_finalize(
        &self,
        upload_id: &UploadId,
        total_chunks: u32,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Sink for upload completion events.
#[async_trait]
pub trait UploadNotifier: ReadinessCheck + 'static {
    /// Enqueue the completion event for `upload_id`.
    ///
    /// Repeated calls for the same upload must be collapsed by the queue (deduplication id
    /// derived from the upload id) so a retried send is delivered at most once.
    async fn notify_upload_complete(
        &self,
        upload_id: &UploadId,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
