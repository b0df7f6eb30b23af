//! ObjectStore errors

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use http::StatusCode;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// General purpose [`super::ObjectStore`] error handling.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error")]
    HTTPError(#[from] http::Error),

    #[error("aws sdk put object error: {0}")]
    AWSSDKPutObjectError(
        #[from] SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    ),
    #[error("aws sdk head bucket error: {0}")]
    AWSSDKHeadBucketError(
        #[from] SdkError<aws_sdk_s3::operation::head_bucket::HeadBucketError>,
    ),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    #[error("key error: {0}")]
    KeyError(#[from] KeyError),
}

impl Error {
    /// Whether retrying the same request could succeed: network failures, timeouts, 5xx and
    /// throttling responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::AWSSDKPutObjectError(e) => sdk_error_is_transient(e),
            Error::AWSSDKHeadBucketError(e) => sdk_error_is_transient(e),
            _ => false,
        }
    }
}

const THROTTLING_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
];

fn sdk_error_is_transient<E: ProvideErrorMetadata>(e: &SdkError<E>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(se) => {
            let status = se.raw().status();
            status_is_transient(status)
                || se
                    .err()
                    .code()
                    .map(|code| THROTTLING_CODES.contains(&code))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

pub(crate) fn status_is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Error type used when parsing [`super::Key`] from [`std::path::PathBuf`].
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("empty key not allowed")]
    Empty,

    #[error("prefix not allowed")]
    PrefixNotAllowed,

    #[error("root dir not allowed")]
    RootDirNotAllowed,

    #[error("current dir (`.`) not allowed")]
    CurDirNotAllowed,

    #[error("parent dir (`..`) not allowed")]
    ParentDirNotAllowed,

    #[error("path components must be valid unicode")]
    PathComponentsMustBeValidUnicode,

    #[error("path components must match regex: {0}")]
    PathComponentsMustMatchRegex(String),
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, true)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, true)]
    #[case(StatusCode::TOO_MANY_REQUESTS, true)]
    #[case(StatusCode::FORBIDDEN, false)]
    #[case(StatusCode::NOT_FOUND, false)]
    #[case(StatusCode::BAD_REQUEST, false)]
    fn classify_status(#[case] status: StatusCode, #[case] transient: bool) {
        assert_eq!(status_is_transient(status), transient);
    }

    #[test]
    fn key_errors_are_permanent() {
        assert!(!Error::KeyError(KeyError::ParentDirNotAllowed).is_transient());
    }
}
