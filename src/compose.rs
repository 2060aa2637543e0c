//! Message composition.
//!
//! The document is written once through a [`MessageWriter`], which feeds
//! every byte to a SHA-256 hasher and to the DATA dot-stuffer. The
//! fingerprint therefore covers the composed document exactly, before any
//! transfer framing.

use std::collections::HashSet;
use std::io::{self, Write};

use log::debug;
use sha2::{Digest, Sha256};
use smtp_engine::DotStuffer;

use crate::error::{ProviderError, Result};
use crate::message::MessageRequest;

/// A composed message ready for the DATA phase.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    framed: Vec<u8>,
    fingerprint: [u8; 32],
}

impl ComposedMessage {
    /// Dot-stuffed document including the `CRLF . CRLF` terminator.
    pub fn framed(&self) -> &[u8] {
        &self.framed
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Lowercase hex SHA-256 of the composed document.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    pub fn len(&self) -> usize {
        self.framed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framed.is_empty()
    }
}

/// Tee writer: hashes and frames in one pass.
pub struct MessageWriter {
    hasher: Sha256,
    stuffer: DotStuffer,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            stuffer: DotStuffer::new(),
        }
    }

    pub fn finish(self) -> ComposedMessage {
        ComposedMessage {
            fingerprint: self.hasher.finalize().into(),
            framed: self.stuffer.finish(),
        }
    }
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MessageWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let written = self.stuffer.write(data)?;
        self.hasher.update(&data[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stuffer.flush()
    }
}

/// Compose `request` with `sender` as the `From` value.
///
/// `bcc` is never consulted here.
pub fn compose(request: &MessageRequest, sender: &str) -> Result<ComposedMessage> {
    let mut w = MessageWriter::new();

    write_segment(&mut w, "From header", format_args!("From:  {}\r\n", sender))?;
    write_segment(
        &mut w,
        "Subject header",
        format_args!("Subject:  {}\r\n", request.subject),
    )?;
    if !request.to.is_empty() {
        write_segment(
            &mut w,
            "To header",
            format_args!("To:  {}\r\n", join(&request.to)),
        )?;
    }
    if !request.cc.is_empty() {
        write_segment(
            &mut w,
            "Cc header",
            format_args!("Cc:  {}\r\n", join(&request.cc)),
        )?;
    }
    for (key, value) in &request.headers {
        write_segment(
            &mut w,
            &format!("{} header", key),
            format_args!("{}: {}\r\n", key, value),
        )?;
    }
    write_segment(&mut w, "body separator", format_args!("\r\n"))?;
    write_segment(&mut w, "body", format_args!("{}", request.body))?;

    let composed = w.finish();
    debug!(
        "Composed message of {} bytes, sha256 {}",
        composed.len(),
        composed.fingerprint_hex()
    );
    Ok(composed)
}

fn write_segment(w: &mut MessageWriter, segment: &str, args: std::fmt::Arguments<'_>) -> Result<()> {
    w.write_fmt(args).map_err(|source| ProviderError::Composition {
        segment: segment.to_string(),
        source,
    })
}

fn join(addresses: &HashSet<String>) -> String {
    addresses
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
