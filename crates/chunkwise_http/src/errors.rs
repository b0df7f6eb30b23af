use axum::extract::rejection::{BytesRejection, PathRejection};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use thiserror;

use chunkwise_core::UploadError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http invalid header value")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("malformed X-Chunk-Hash header")]
    MalformedChunkHash,
    #[error(transparent)]
    PathRejection(#[from] PathRejection),
    #[error(transparent)]
    BodyRejection(#[from] BytesRejection),

    #[error(transparent)]
    UploadError(#[from] UploadError),
}

/// Machine-readable error code carried in every error body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    PayloadTooLarge,
    IntegrityError,
    ChunkOutOfRange,
    SessionUnknown,
    BackendError,
    Cancelled,
    NotificationFailed,
    InternalError,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: ErrorCode,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorInfo>,
}

#[inline]
fn into_error_response(code: ErrorCode, message: String) -> Response {
    let response = ErrorResponse {
        errors: vec![ErrorInfo { code, message }],
    };
    (status_code(&code), axum::Json(response)).into_response()
}

#[inline]
fn status_code(c: &ErrorCode) -> StatusCode {
    match c {
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::IntegrityError => StatusCode::BAD_REQUEST,
        ErrorCode::ChunkOutOfRange => StatusCode::BAD_REQUEST,
        ErrorCode::SessionUnknown => StatusCode::FORBIDDEN,
        ErrorCode::BackendError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::NotificationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::UploadError(e) => upload_error_to_response(e),
            Error::MalformedChunkHash => {
                into_error_response(ErrorCode::InvalidRequest, self.to_string())
            }
            Error::PathRejection(rejection) => {
                into_error_response(ErrorCode::InvalidRequest, rejection.body_text())
            }
            Error::BodyRejection(rejection) => {
                let code = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ErrorCode::PayloadTooLarge
                } else {
                    ErrorCode::InvalidRequest
                };
                into_error_response(code, rejection.body_text())
            }
            Error::HTTPInvalidHeaderValue(_) => {
                tracing::warn!("{:?}", self);
                into_error_response(
                    ErrorCode::InternalError,
                    String::from("internal server error"),
                )
            }
        }
    }
}

#[inline]
fn upload_error_to_response(e: UploadError) -> Response {
    match e {
        UploadError::InvalidRequest(_) => {
            into_error_response(ErrorCode::InvalidRequest, e.to_string())
        }
        UploadError::IntegrityMismatch { .. } => {
            into_error_response(ErrorCode::IntegrityError, e.to_string())
        }
        UploadError::ChunkOutOfRange { .. } => {
            into_error_response(ErrorCode::ChunkOutOfRange, e.to_string())
        }
        UploadError::SessionNotFound(_) => {
            into_error_response(ErrorCode::SessionUnknown, e.to_string())
        }
        UploadError::StageFailed {
            stage,
            ref upload_id,
            chunk_index,
            ..
        } => {
            tracing::error!("{e}");
            let code = if e.is_cancelled() {
                ErrorCode::Cancelled
            } else {
                ErrorCode::BackendError
            };
            into_error_response(
                code,
                format!("{stage} failed for chunk {chunk_index} of upload {upload_id}"),
            )
        }
        UploadError::NotificationFailed {
            ref upload_id,
            chunk_index,
            ..
        } => {
            tracing::error!("{e}");
            into_error_response(
                ErrorCode::NotificationFailed,
                format!(
                    "chunk {chunk_index} of upload {upload_id} stored, completion notification failed"
                ),
            )
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(ErrorCode::InvalidRequest, "\"INVALID_REQUEST\"")]
    #[case(ErrorCode::PayloadTooLarge, "\"PAYLOAD_TOO_LARGE\"")]
    #[case(ErrorCode::ChunkOutOfRange, "\"CHUNK_OUT_OF_RANGE\"")]
    #[case(ErrorCode::NotificationFailed, "\"NOTIFICATION_FAILED\"")]
    fn error_code_wire_format(#[case] code: ErrorCode, #[case] expected: &str) {
        assert_eq!(serde_json::to_string(&code).unwrap(), expected);
    }
}
