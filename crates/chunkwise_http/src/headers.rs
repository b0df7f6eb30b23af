use headers::{Header, HeaderName, HeaderValue};

/// Declared SHA-256 of a chunk body, hex encoded.
///
/// Decoding only requires a visible-ASCII value; the digest format itself is validated by the
/// coordinator so that a malformed hash is reported as such rather than as a missing header.
pub struct XChunkHash(pub String);

pub static X_CHUNK_HASH: HeaderName = HeaderName::from_static("x-chunk-hash");

impl Header for XChunkHash {
    fn name() -> &'static HeaderName {
        &X_CHUNK_HASH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(XChunkHash(s.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value))
        }
    }
}
