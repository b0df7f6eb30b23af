//! In-process implementations of the [`crate::registry`] contracts.
//!
//! They reproduce the conditional-write semantics of the production backends (a single mutex
//! guards each check-and-apply, so concurrent callers race exactly the way they would against
//! a database row) and allow failures to be injected ahead of time. Every data-path operation
//! runs through the same [`RetryPolicy`] machinery the real backends use.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::registry::{ChunkStore, ReadinessCheck, SessionStore, UploadNotifier};
use crate::retry::{RetryError, RetryPolicy, RetryProfiles};
use crate::session::{ChunkKey, UploadId, UploadSession, UploadStatus};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl MemoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoryError::Transient(_))
    }
}

impl From<RetryError<MemoryError>> for Error {
    fn from(e: RetryError<MemoryError>) -> Error {
        match e {
            RetryError::Cancelled => Error::Cancelled,
            e => Error::BackendError(Box::new(e)),
        }
    }
}

/// Queue of failures to return from the next calls of one operation.
#[derive(Default)]
struct Faults {
    queue: Mutex<VecDeque<MemoryError>>,
}

impl Faults {
    fn push(&self, e: MemoryError) {
        self.queue.lock().expect("faults lock poisoned").push_back(e);
    }

    fn take(&self) -> std::result::Result<(), MemoryError> {
        match self.queue.lock().expect("faults lock poisoned").pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct ReadyFlag {
    ready: AtomicBool,
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
        }
    }
}

impl ReadyFlag {
    fn set(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    async fn probe(&self, policy: RetryPolicy, cancel: &CancellationToken) -> Result<()> {
        let ready = &self.ready;
        policy
            .run(
                cancel,
                move || async move {
                    if ready.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(MemoryError::Transient(String::from("not ready")))
                    }
                },
                MemoryError::is_transient,
            )
            .await?;
        Ok(())
    }
}

/// Chunk storage in a `HashMap`.
#[derive(Default)]
pub struct MemoryChunkStore {
    objects: Mutex<HashMap<String, Bytes>>,
    write_attempts: AtomicUsize,
    faults: Faults,
    readiness: ReadyFlag,
    retry: RetryProfiles,
}

impl MemoryChunkStore {
    pub fn new(retry: RetryProfiles) -> Self {
        Self {
            retry,
            ..Default::default()
        }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<Bytes> {
        self.objects
            .lock()
            .expect("objects lock poisoned")
            .get(key.as_str())
            .cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("objects lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of write attempts, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Make the next write attempt fail with `e`.
    pub fn fail_next_write(&self, e: MemoryError) {
        self.faults.push(e);
    }

    pub fn set_ready(&self, ready: bool) {
        self.readiness.set(ready);
    }

    fn put_once(&self, key: &ChunkKey, bytes: Bytes) -> std::result::Result<(), MemoryError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.faults.take()?;
        self.objects
            .lock()
            .expect("objects lock poisoned")
            .insert(key.to_string(), bytes);
        Ok(())
    }
}

#[async_trait]
impl ReadinessCheck for MemoryChunkStore {
    fn name(&self) -> &'static str {
        "memory[chunks]"
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<()> {
        self.readiness.probe(self.retry.probe, cancel).await
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put_chunk(
        &self,
        key: &ChunkKey,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let this = self;
        self.retry
            .data
            .run(
                cancel,
                move || {
                    let bytes = bytes.clone();
                    async move { this.put_once(key, bytes) }
                },
                MemoryError::is_transient,
            )
            .await?;
        Ok(())
    }
}

enum AddChunkOutcome {
    Added,
    AlreadyCompleted,
    OutOfRange(u32),
    NotFound,
}

struct SessionRecord {
    session: UploadSession,
    /// Token of the `try_finalize` call that completed the session.
    finalized_by: Option<u64>,
}

/// Session records in a `HashMap` behind a single mutex.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<UploadId, SessionRecord>>,
    finalize_tokens: AtomicU64,
    add_chunk_faults: Faults,
    finalize_faults: Faults,
    lost_finalize_acks: Faults,
    readiness: ReadyFlag,
    retry: RetryProfiles,
}

impl MemorySessionStore {
    pub fn new(retry: RetryProfiles) -> Self {
        Self {
            retry,
            ..Default::default()
        }
    }

    /// Register a new `pending` session. Returns `false` if one already exists.
    pub fn register_session(&self, upload_id: UploadId, total_chunks: u32) -> bool {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        if sessions.contains_key(&upload_id) {
            return false;
        }
        sessions.insert(
            upload_id.clone(),
            SessionRecord {
                session: UploadSession::new(upload_id, total_chunks),
                finalized_by: None,
            },
        );
        true
    }

    pub fn snapshot(&self, upload_id: &UploadId) -> Option<UploadSession> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .get(upload_id)
            .map(|record| record.session.clone())
    }

    pub fn fail_next_add_chunk(&self, e: MemoryError) {
        self.add_chunk_faults.push(e);
    }

    pub fn fail_next_finalize(&self, e: MemoryError) {
        self.finalize_faults.push(e);
    }

    /// Make the next finalize attempt apply its update and then report `e`, as if the
    /// commit acknowledgement was lost.
    pub fn lose_next_finalize_ack(&self, e: MemoryError) {
        self.lost_finalize_acks.push(e);
    }

    pub fn set_ready(&self, ready: bool) {
        self.readiness.set(ready);
    }

    fn add_chunk_once(
        &self,
        upload_id: &UploadId,
        chunk_index: u32,
    ) -> std::result::Result<AddChunkOutcome, MemoryError> {
        self.add_chunk_faults.take()?;
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        let session = match sessions.get_mut(upload_id) {
            Some(record) => &mut record.session,
            None => return Ok(AddChunkOutcome::NotFound),
        };
        if session.is_completed() {
            return Ok(AddChunkOutcome::AlreadyCompleted);
        }
        if chunk_index >= session.total_chunks {
            return Ok(AddChunkOutcome::OutOfRange(session.total_chunks));
        }
        session.uploaded_chunks.insert(chunk_index);
        session.status = UploadStatus::InProgress;
        Ok(AddChunkOutcome::Added)
    }

    fn try_finalize_once(
        &self,
        upload_id: &UploadId,
        total_chunks: u32,
        token: u64,
    ) -> std::result::Result<bool, MemoryError> {
        self.finalize_faults.take()?;
        let won = {
            let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
            match sessions.get_mut(upload_id) {
                // an earlier attempt of this same call already won
                Some(record) if record.finalized_by == Some(token) => true,
                Some(record)
                    if record.session.total_chunks == total_chunks
                        && record.session.all_chunks_received()
                        && !record.session.is_completed() =>
                {
                    record.session.status = UploadStatus::Completed;
                    record.finalized_by = Some(token);
                    true
                }
                _ => false,
            }
        };
        self.lost_finalize_acks.take()?;
        Ok(won)
    }
}

#[async_trait]
impl ReadinessCheck for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory[sessions]"
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<()> {
        self.readiness.probe(self.retry.probe, cancel).await
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(
        &self,
        upload_id: &UploadId,
        _cancel: &CancellationToken,
    ) -> Result<UploadSession> {
        self.snapshot(upload_id)
            .ok_or_else(|| Error::SessionNotFound(upload_id.to_string()))
    }

    async fn add_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let this = self;
        let outcome = self
            .retry
            .data
            .run(
                cancel,
                move || async move { this.add_chunk_once(upload_id, chunk_index) },
                MemoryError::is_transient,
            )
            .await?;

        match outcome {
            AddChunkOutcome::Added | AddChunkOutcome::AlreadyCompleted => Ok(()),
            AddChunkOutcome::OutOfRange(total_chunks) => Err(Error::ChunkOutOfRange {
                chunk_index,
                total_chunks,
            }),
            AddChunkOutcome::NotFound => Err(Error::SessionNotFound(upload_id.to_string())),
        }
    }

    async fn try_finalize(
        &self,
        upload_id: &UploadId,
        total_chunks: u32,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let this = self;
        let token = self.finalize_tokens.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .retry
            .data
            .run(
                cancel,
                move || async move { this.try_finalize_once(upload_id, total_chunks, token) },
                MemoryError::is_transient,
            )
            .await?)
    }
}

/// Completion queue that deduplicates on [`UploadId::deduplication_id`] like a FIFO queue.
#[derive(Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<UploadId>>,
    seen: Mutex<HashSet<String>>,
    send_attempts: AtomicUsize,
    faults: Faults,
    lost_acks: Faults,
    readiness: ReadyFlag,
    retry: RetryProfiles,
}

impl MemoryNotifier {
    pub fn new(retry: RetryProfiles) -> Self {
        Self {
            retry,
            ..Default::default()
        }
    }

    /// Events as a consumer would receive them, duplicates already collapsed.
    pub fn delivered(&self) -> Vec<UploadId> {
        self.delivered
            .lock()
            .expect("delivered lock poisoned")
            .clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Make the next send fail before anything is enqueued.
    pub fn fail_next_send(&self, e: MemoryError) {
        self.faults.push(e);
    }

    /// Make the next send enqueue the event and then report `e`, as if the acknowledgement
    /// was lost on the way back.
    pub fn lose_next_ack(&self, e: MemoryError) {
        self.lost_acks.push(e);
    }

    pub fn set_ready(&self, ready: bool) {
        self.readiness.set(ready);
    }

    fn send_once(&self, upload_id: &UploadId) -> std::result::Result<(), MemoryError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        self.faults.take()?;
        let first = self
            .seen
            .lock()
            .expect("seen lock poisoned")
            .insert(upload_id.deduplication_id());
        if first {
            self.delivered
                .lock()
                .expect("delivered lock poisoned")
                .push(upload_id.clone());
        }
        self.lost_acks.take()
    }
}

#[async_trait]
impl ReadinessCheck for MemoryNotifier {
    fn name(&self) -> &'static str {
        "memory[notifications]"
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<()> {
        self.readiness.probe(self.retry.probe, cancel).await
    }
}

#[async_trait]
impl UploadNotifier for MemoryNotifier {
    async fn notify_upload_complete(
        &self,
        upload_id: &UploadId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let this = self;
        self.retry
            .data
            .run(
                cancel,
                move || async move { this.send_once(upload_id) },
                MemoryError::is_transient,
            )
            .await?;
        Ok(())
    }
}
