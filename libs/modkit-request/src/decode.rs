//! Response body decompression.
//!
//! The declared `Content-Encoding` is tried first. Servers regularly label
//! zlib-wrapped data as `deflate` (or worse), so when the declared decoder
//! fails the same bytes are retried as zlib before giving up.

use crate::error::HttpError;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;
use std::sync::Arc;

/// Supported `Content-Encoding` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
    Identity,
}

impl Encoding {
    fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip") => {
                Encoding::Gzip
            }
            Some(v) if v.eq_ignore_ascii_case("deflate") => Encoding::Deflate,
            _ => Encoding::Identity,
        }
    }
}

/// Decompress `raw` according to the `Content-Encoding` header value.
///
/// Unknown or absent encodings pass the bytes through unchanged.
///
/// # Errors
/// Returns `HttpError::Decode` when both the declared decoder and the zlib
/// fallback fail.
pub fn decompress(content_encoding: Option<&str>, raw: &Bytes) -> Result<Bytes, HttpError> {
    let encoding = Encoding::from_header(content_encoding);
    let declared = match encoding {
        Encoding::Identity => return Ok(raw.clone()),
        Encoding::Gzip => read_all(GzDecoder::new(raw.as_ref())),
        Encoding::Deflate => read_all(DeflateDecoder::new(raw.as_ref())),
    };

    match declared {
        Ok(bytes) => Ok(bytes),
        Err(err) => {
            tracing::debug!(
                ?encoding,
                error = %err,
                "declared content encoding failed, retrying as zlib"
            );
            read_all(ZlibDecoder::new(raw.as_ref())).map_err(|_| HttpError::Decode {
                encoding: content_encoding.unwrap_or_default().to_owned(),
                source: Arc::new(err),
            })
        }
    }
}

fn read_all(mut reader: impl Read) -> std::io::Result<Bytes> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}
