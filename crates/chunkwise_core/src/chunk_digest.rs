use digest::Digest;
use sha2::Sha256;

use crate::{Error, Result};

/// Hex-encoded SHA-256 digest of a chunk body.
///
/// Clients declare it in the `X-Chunk-Hash` header. Parsing accepts either case and normalizes to
/// lowercase so that comparison against a computed digest is a plain string comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDigest {
    encoded: String,
}

const SHA256_HEX_LEN: usize = 64;

impl TryFrom<&str> for ChunkDigest {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != SHA256_HEX_LEN {
            return Err(Error::InvalidChunkHash(s.to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidChunkHash(s.to_string()));
        }
        Ok(Self {
            encoded: s.to_ascii_lowercase(),
        })
    }
}

impl ChunkDigest {
    pub fn from_bytes(bs: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, bs);
        Self {
            encoded: format!("{:x}", hasher.finalize()),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.encoded)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[rstest]
    #[case::lowercase(HELLO_SHA256, true)]
    #[case::uppercase("2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824", true)]
    #[case::surrounding_whitespace(" 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824 ", true)]
    #[case::too_short("2cf24dba", false)]
    #[case::empty("", false)]
    #[case::not_hex("zzf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", false)]
    #[case::prefixed("sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b", false)]
    fn validate_try_from(#[case] input: &str, #[case] valid: bool) {
        let actual = ChunkDigest::try_from(input);
        match (valid, actual) {
            (true, Ok(d)) => assert_eq!(d.as_str(), HELLO_SHA256),
            (false, Err(Error::InvalidChunkHash(_))) => {}
            (valid, other) => panic!("expected valid={valid}, got {other:?}"),
        }
    }

    #[test]
    fn computed_digest_matches_declared() {
        let declared = ChunkDigest::try_from(HELLO_SHA256).unwrap();
        assert_eq!(ChunkDigest::from_bytes(b"hello"), declared);
        assert_ne!(ChunkDigest::from_bytes(b"hello!"), declared);
    }
}
