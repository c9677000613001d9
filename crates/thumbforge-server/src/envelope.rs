//! Binary cache envelope for thumbnails.
//!
//! Cached thumbnails carry their content type alongside the payload so a
//! cache hit can be served without reparsing the URL:
//!
//! ```text
//! [4 bytes: content-type length, big-endian][content-type][image data]
//! ```
//!
//! A corrupt envelope is treated as a cache miss by the handler, never as a
//! request failure.

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope too short")]
    TooShort,

    #[error("content type truncated")]
    Truncated,

    #[error("content type is not valid UTF-8")]
    InvalidContentType,
}

pub fn encode(content_type: &str, data: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(4 + content_type.len() + data.len());
    buf.extend_from_slice(&(content_type.len() as u32).to_be_bytes());
    buf.extend_from_slice(content_type.as_bytes());
    buf.extend_from_slice(data);
    Bytes::from(buf)
}

pub fn decode(raw: &Bytes) -> Result<(String, Bytes), EnvelopeError> {
    if raw.len() < 4 {
        return Err(EnvelopeError::TooShort);
    }
    let ct_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    if raw.len() < 4 + ct_len {
        return Err(EnvelopeError::Truncated);
    }
    let content_type = std::str::from_utf8(&raw[4..4 + ct_len])
        .map_err(|_| EnvelopeError::InvalidContentType)?
        .to_string();
    Ok((content_type, raw.slice(4 + ct_len..)))
}
