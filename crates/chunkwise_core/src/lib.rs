//! # Chunkwise Core
//!
//! Upload-session coordination for files that arrive as independently uploaded, fixed-size
//! chunks. Chunks may arrive out of order, more than once, and concurrently; this crate decides
//! when an upload is complete and makes sure the completion notification for an upload is sent
//! by exactly one request.
//!
//! The crate owns the data model ([`UploadSession`]), the collaborator contracts
//! ([`registry::ChunkStore`], [`registry::SessionStore`], [`registry::UploadNotifier`]), the
//! [`RetryPolicy`] used by backend implementations, and the [`UploadCoordinator`] that strings
//! them together. Backends live in other crates; [`memory`] provides in-process implementations
//! of every contract for tests.
mod errors;
pub use errors::{Error, Result, UploadError};

mod chunk_digest;
pub use chunk_digest::ChunkDigest;

mod session;
pub use session::{ChunkKey, UploadId, UploadSession, UploadStatus};

mod retry;
pub use retry::{RetryError, RetryPolicy, RetryProfiles};

pub mod registry;

mod health;
pub use health::{ComponentReadiness, Readiness, PROBE_TIMEOUT};

mod coordinator;
pub use coordinator::{ChunkReceipt, ChunkUpload, UploadCoordinator, UploadStage};

pub mod memory;
