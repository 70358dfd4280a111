//! Gzip helpers for request and response bodies.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, CONTENT_ENCODING};

use crate::error::Error;

/// Content-Encoding / Accept-Encoding token for gzip.
pub const GZIP: &str = "gzip";

/// Compresses a request body.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    gzip_into(Vec::with_capacity(data.len() / 2), data)
}

fn gzip_into<W: Write>(sink: W, data: &[u8]) -> Result<W, Error> {
    let mut encoder = GzEncoder::new(sink, Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("finalize: {}", e)))
}

/// Decompresses a gzip response body.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::Decompression(e.to_string()))?;
    Ok(decompressed)
}

/// Returns true if the response declares a gzip content encoding.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(GZIP))
}
