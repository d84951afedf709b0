use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use std::fmt;
use std::io::{self, Read};

const BROTLI_BUFFER_SIZE: usize = 4096;

/// A single `Content-Encoding` coding the fetcher knows how to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Unknown codings are treated as identity.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => ContentEncoding::Gzip,
            "deflate" => ContentEncoding::Deflate,
            "br" => ContentEncoding::Brotli,
            _ => ContentEncoding::Identity,
        }
    }

    /// Codings in the order they were applied by the server.
    pub fn parse_header(value: Option<&str>) -> Vec<ContentEncoding> {
        value
            .map(|value| {
                value
                    .split(',')
                    .map(ContentEncoding::from_token)
                    .filter(|encoding| *encoding != ContentEncoding::Identity)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
        }
    }

    pub fn decode(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoded = Vec::with_capacity(raw.len() * 4);
        match self {
            ContentEncoding::Identity => decoded.extend_from_slice(raw),
            ContentEncoding::Gzip => {
                MultiGzDecoder::new(raw).read_to_end(&mut decoded)?;
            }
            ContentEncoding::Deflate => {
                // Servers disagree on whether "deflate" means zlib-wrapped or raw.
                if ZlibDecoder::new(raw).read_to_end(&mut decoded).is_err() {
                    decoded.clear();
                    DeflateDecoder::new(raw).read_to_end(&mut decoded)?;
                }
            }
            ContentEncoding::Brotli => {
                brotli::Decompressor::new(raw, BROTLI_BUFFER_SIZE).read_to_end(&mut decoded)?;
            }
        }
        Ok(decoded)
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undoes every coding listed in the header, last applied first.
///
/// On failure returns the coding that could not be decoded alongside the I/O error.
pub fn decode_body(
    encodings: &[ContentEncoding],
    raw: Vec<u8>,
) -> Result<Vec<u8>, (ContentEncoding, io::Error)> {
    encodings.iter().rev().try_fold(raw, |body, encoding| {
        encoding.decode(&body).map_err(|e| (*encoding, e))
    })
}
