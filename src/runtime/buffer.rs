//! Per-connection frame buffer.
//!
//! Accumulates bytes from the socket until a delimiter shows up. Scanning is
//! incremental: each append only searches the new bytes plus the tail of the
//! previous data a delimiter could straddle, so a large request arriving in
//! many reads is not rescanned from the start each time.

use crate::protocol::{self, DELIMITER};
use bytes::BytesMut;

/// Growable accumulator holding at most one partial frame, or one complete
/// frame followed by whatever arrived after its delimiter.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: BytesMut,
    /// Offset below which no delimiter can start.
    scanned: usize,
    complete: bool,
}

impl FrameBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Append freshly read bytes and look for a delimiter among them.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if !self.complete {
            self.complete = protocol::find_delimiter(&self.data, self.scanned).is_some();
            self.scanned = self.data.len().saturating_sub(DELIMITER.len() - 1);
        }
    }

    /// Whether a delimiter has arrived.
    pub fn has_frame(&self) -> bool {
        self.complete
    }

    /// The frame and the bytes after its delimiter, once complete.
    pub fn split(&self) -> Option<(&[u8], &[u8])> {
        if !self.complete {
            return None;
        }
        protocol::extract_frame(&self.data)
    }

    /// Bytes held so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop everything, including bytes after the delimiter.
    pub fn clear(&mut self) {
        self.data.clear();
        self.scanned = 0;
        self.complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(buf: &FrameBuffer) -> Option<&[u8]> {
        buf.split().map(|(frame, _)| frame)
    }

    #[test]
    fn test_frame_in_one_append() {
        let mut buf = FrameBuffer::default();
        buf.extend(b"LIST\r\n\r\n");
        assert!(buf.has_frame());
        assert_eq!(buf.split(), Some((&b"LIST"[..], &b""[..])));
    }

    #[test]
    fn test_delimiter_split_across_appends() {
        let mut buf = FrameBuffer::default();
        buf.extend(b"GET file");
        assert!(!buf.has_frame());
        buf.extend(b"\r\n");
        assert!(!buf.has_frame());
        buf.extend(b"\r");
        assert_eq!(frame(&buf), None);
        buf.extend(b"\n");
        assert_eq!(frame(&buf), Some(&b"GET file"[..]));
    }

    #[test]
    fn test_byte_at_a_time_matches_single_append() {
        let input = b"UPLOAD name\r\ncontent\r\n\r\nextra";

        let mut whole = FrameBuffer::default();
        whole.extend(input);

        let mut split = FrameBuffer::default();
        for b in input.iter() {
            split.extend(std::slice::from_ref(b));
        }

        assert_eq!(whole.split(), split.split());
        assert_eq!(
            split.split(),
            Some((&b"UPLOAD name\r\ncontent"[..], &b"extra"[..]))
        );
    }

    #[test]
    fn test_first_delimiter_wins() {
        let mut buf = FrameBuffer::default();
        buf.extend(b"A\r\n\r\n");
        buf.extend(b"B\r\n\r\n");
        assert_eq!(buf.split(), Some((&b"A"[..], &b"B\r\n\r\n"[..])));
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut buf = FrameBuffer::with_capacity(64);
        buf.extend(b"A\r\n\r\nleftover");
        buf.clear();
        assert!(buf.is_empty());
        assert!(!buf.has_frame());

        buf.extend(b"\r\n\r\n");
        assert_eq!(frame(&buf), Some(&b""[..]));
    }
}
