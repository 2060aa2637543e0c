//! DATA-phase transparency (RFC 5321 §4.5.2).
//!
//! [`DotStuffer`] is an `io::Write` sink that escapes every line starting
//! with `.` as it is written, so a caller can frame a message in the same
//! pass that produces it. [`DotStuffer::finish`] appends the
//! `CRLF . CRLF` terminator.

use std::io;

/// Streaming dot-stuffing encoder over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct DotStuffer {
    buf: Vec<u8>,
    at_line_start: bool,
    last_two: [u8; 2],
}

impl DotStuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            at_line_start: true,
            last_two: [0, 0],
        }
    }

    /// Push one content byte, escaping a leading dot.
    fn push(&mut self, byte: u8) {
        if self.at_line_start && byte == b'.' {
            self.buf.push(b'.');
        }
        self.buf.push(byte);
        self.at_line_start = byte == b'\n';
        self.last_two = [self.last_two[1], byte];
    }

    /// Terminate the data and return the framed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.last_two != *b"\r\n" {
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf.extend_from_slice(b".\r\n");
        self.buf
    }
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for DotStuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        for &byte in data {
            self.push(byte);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
