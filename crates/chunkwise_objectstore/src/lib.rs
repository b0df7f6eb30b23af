use std::path::Component;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

mod errors;
pub use errors::{Error, KeyError, Result};
pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3;

/// A wrapper around [`std::path::PathBuf`] that rejects unsavory key names.
///
/// The following rules applied during the [`TryFrom<PathBuf>`] implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths are normalized (`//` are replaced with `/` and never end in `/`)
/// * paths must not contain relative segments (ie `.` or `..`)
/// * only characters explicitly documented as safe [in the S3
///   docs](https://docs.aws.amazon.com/AmazonS3/latest/userguide/object-keys.html) are allowed in
///   path segments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    key: PathBuf,
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        if key.as_os_str().is_empty() {
            return Err(KeyError::Empty.into());
        }
        Ok(Key { key })
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(s: &str) -> Result<Key> {
        Key::try_from(PathBuf::from(s))
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.*'()!-]+$").unwrap());
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

/// Provides a common interface for interacting with different kinds of backend object stores.
///
/// Only whole-object writes are needed: every chunk is small enough to be sent in a single
/// request, and writing an existing key replaces the object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(&self, key: &Key, body: Bytes) -> Result<()>;

    /// Cheap reachability check of the store (for S3, `HeadBucket`).
    async fn probe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    // validate object safety
    #[allow(dead_code)]
    struct Whatever {
        objectstore: Box<dyn ObjectStore>,
    }

    #[rstest]
    #[case::chunk_key("uploads/abc123/chunk_0", Some("uploads/abc123/chunk_0"))]
    #[case::double_slash("uploads//abc/chunk_1", Some("uploads/abc/chunk_1"))]
    #[case::trailing_slash("uploads/abc/", Some("uploads/abc"))]
    #[case::punctuation("uploads/a.b-c_(1)!/chunk_2", Some("uploads/a.b-c_(1)!/chunk_2"))]
    #[case::absolute("/uploads/abc", None)]
    #[case::parent("uploads/../abc", None)]
    #[case::space("uploads/a b", None)]
    #[case::empty("", None)]
    fn key_validation(#[case] input: &str, #[case] expected: Option<&str>) {
        let actual = Key::try_from(input).ok().map(|k| String::from(&k));
        assert_eq!(actual.as_deref(), expected);
    }
}
