use std::borrow::Cow;

use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::operation::get_queue_attributes::GetQueueAttributesError;
use aws_sdk_sqs::operation::send_message::SendMessageError;
use http::StatusCode;
use thiserror;

use chunkwise_core::RetryError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("objectstore error: {0}")]
    ObjectStoreError(#[from] chunkwise_objectstore::Error),

    #[error("sqlx error: {0}")]
    SQLXError(#[from] sqlx::Error),
    #[error("sqlx migration error: {0}")]
    SQLXMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("sea-query error: {0}")]
    SeaQueryError(#[from] sea_query::error::Error),

    #[error("aws sdk send message error: {0}")]
    AWSSDKSendMessageError(#[from] SdkError<SendMessageError>),
    #[error("aws sdk get queue attributes error: {0}")]
    AWSSDKGetQueueAttributesError(#[from] SdkError<GetQueueAttributesError>),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    #[error("error serializing to json")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("upload session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid total chunk count: {0}")]
    InvalidTotalChunks(u32),
    #[error("chunk index {chunk_index} out of range for upload with {total_chunks} chunks")]
    ChunkOutOfRange { chunk_index: u32, total_chunks: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the failed operation may succeed if attempted again unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ObjectStoreError(e) => e.is_transient(),
            Error::SQLXError(e) => sqlx_error_is_transient(e),
            Error::AWSSDKSendMessageError(e) => sqs_error_is_transient(e),
            Error::AWSSDKGetQueueAttributesError(e) => sqs_error_is_transient(e),
            _ => false,
        }
    }
}

impl From<RetryError<Error>> for Error {
    fn from(e: RetryError<Error>) -> Error {
        match e {
            RetryError::Cancelled => Error::Cancelled,
            RetryError::Failed { error, .. } => error,
        }
    }
}

impl From<Error> for chunkwise_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Cancelled => chunkwise_core::Error::Cancelled,
            Error::SessionNotFound(id) => chunkwise_core::Error::SessionNotFound(id),
            Error::ChunkOutOfRange {
                chunk_index,
                total_chunks,
            } => chunkwise_core::Error::ChunkOutOfRange {
                chunk_index,
                total_chunks,
            },
            _ => chunkwise_core::Error::BackendError(Box::new(e)),
        }
    }
}

fn sqlx_error_is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(dberr) => dberr
            .code()
            .map(|code| sqlstate_is_transient(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// Serialization failures, deadlocks, connection exceptions and server shutdowns.
fn sqlstate_is_transient(code: &Cow<'_, str>) -> bool {
    matches!(
        code.as_ref(),
        "40001" | "40P01" | "57P01" | "57P02" | "57P03"
    ) || code.starts_with("08")
}

const SQS_THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestThrottled",
    "RequestTimeout",
];

fn sqs_error_is_transient<E: ProvideErrorMetadata>(e: &SdkError<E>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(se) => {
            let status = se.raw().status();
            status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || se
                    .err()
                    .code()
                    .map(|code| SQS_THROTTLING_CODES.contains(&code))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::serialization_failure("40001", true)]
    #[case::deadlock("40P01", true)]
    #[case::admin_shutdown("57P01", true)]
    #[case::cannot_connect_now("57P03", true)]
    #[case::connection_failure("08006", true)]
    #[case::unique_violation("23505", false)]
    #[case::check_violation("23514", false)]
    #[case::undefined_table("42P01", false)]
    fn classify_sqlstate(#[case] code: &str, #[case] transient: bool) {
        assert_eq!(sqlstate_is_transient(&Cow::Borrowed(code)), transient);
    }

    #[rstest]
    #[case(sqlx::Error::PoolTimedOut, true)]
    #[case(sqlx::Error::WorkerCrashed, true)]
    #[case(sqlx::Error::RowNotFound, false)]
    #[case(sqlx::Error::ColumnNotFound(String::from("status")), false)]
    fn classify_sqlx_error(#[case] e: sqlx::Error, #[case] transient: bool) {
        assert_eq!(Error::from(e).is_transient(), transient);
    }

    #[test]
    fn retry_error_unwraps_to_last_error() {
        let e = Error::from(RetryError::Failed {
            attempts: 5,
            error: Error::SessionNotFound(String::from("u1")),
        });
        assert!(matches!(e, Error::SessionNotFound(ref id) if id == "u1"));
        assert!(matches!(
            Error::from(RetryError::<Error>::Cancelled),
            Error::Cancelled
        ));
    }

    #[test]
    fn conversion_preserves_core_kinds() {
        assert!(matches!(
            chunkwise_core::Error::from(Error::Cancelled),
            chunkwise_core::Error::Cancelled
        ));
        assert!(matches!(
            chunkwise_core::Error::from(Error::ChunkOutOfRange {
                chunk_index: 3,
                total_chunks: 3
            }),
            chunkwise_core::Error::ChunkOutOfRange { .. }
        ));
        assert!(matches!(
            chunkwise_core::Error::from(Error::SQLXError(sqlx::Error::PoolTimedOut)),
            chunkwise_core::Error::BackendError(_)
        ));
    }
}
