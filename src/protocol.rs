//! Frame codec for the delimiter-framed text protocol.
//!
//! Requests and responses are plain text terminated by `\r\n\r\n`. There is
//! no length prefix and no escaping: a payload that itself contains the
//! delimiter is cut short at its first occurrence.
//!
//! Everything here is pure; the connection handler owns the I/O.

use bytes::{BufMut, Bytes, BytesMut};
use std::str::Utf8Error;

/// Frame terminator shared by requests and responses.
pub const DELIMITER: &[u8] = b"\r\n\r\n";

/// Find the first delimiter at or after `from`, returning its start offset.
pub fn find_delimiter(buffer: &[u8], from: usize) -> Option<usize> {
    let start = from.min(buffer.len());
    buffer[start..]
        .windows(DELIMITER.len())
        .position(|w| w == DELIMITER)
        .map(|pos| start + pos)
}

/// Split a buffer at the first delimiter.
///
/// Returns the frame (without delimiter) and whatever follows the delimiter,
/// or `None` if no complete frame is present yet.
pub fn extract_frame(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = find_delimiter(buffer, 0)?;
    Some((&buffer[..end], &buffer[end + DELIMITER.len()..]))
}

/// Decode a request frame to text with surrounding whitespace removed.
pub fn decode_request(frame: &[u8]) -> Result<&str, Utf8Error> {
    std::str::from_utf8(frame).map(str::trim)
}

/// An encoded response, ready to be written in bounded chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    bytes: Bytes,
}

impl ResponseFrame {
    /// Total encoded length including the delimiter.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Slices of at most `chunk_size` bytes which concatenate to the frame.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, u8> {
        self.as_bytes().chunks(chunk_size)
    }
}

/// Encode a response text followed by the delimiter.
pub fn build_response(text: &str) -> ResponseFrame {
    let mut buf = BytesMut::with_capacity(text.len() + DELIMITER.len());
    buf.put_slice(text.as_bytes());
    buf.put_slice(DELIMITER);
    ResponseFrame {
        bytes: buf.freeze(),
    }
}
