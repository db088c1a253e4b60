//! Wire framing. The source program relied on "one `recv` call returns
//! exactly one message" — true enough over a local loopback but not a
//! general TCP guarantee. This crate frames every envelope explicitly as
//! one line of compact JSON terminated by `\n`; all peers on a network must
//! agree on this (see DESIGN.md "message framing").

use std::io::{BufRead, Read, Write};

use crate::envelope::Envelope;
use crate::error::{NodeError, Result};

pub fn write_frame<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let mut line = envelope.to_wire_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).map_err(NodeError::Io)
}

/// Read one newline-delimited frame. Returns `Ok(None)` on a clean EOF
/// (peer closed before sending another frame), which callers treat as a
/// normal session teardown rather than an error.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Envelope>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).map_err(NodeError::Io)?;
    if n == 0 {
        return Ok(None);
    }
    Envelope::from_wire_str(&line).map(Some)
}

/// Handshake bytes are raw UTF-8 of a PEM public key — not JSON, not
/// framed. Sent as a single `write_all`.
pub fn send_handshake_id<W: Write>(writer: &mut W, id_pem: &str) -> Result<()> {
    writer.write_all(id_pem.as_bytes()).map_err(NodeError::Io)
}

/// Read up to 4096 bytes and decode as the peer's `id`, matching the
/// source's `conn.recv(4096)`.
pub fn read_handshake_id<R: Read>(reader: &mut R) -> Result<String> {
    let mut buf = [0u8; 4096];
    let n = reader.read(&mut buf).map_err(NodeError::Io)?;
    if n == 0 {
        return Err(NodeError::Handshake("peer closed during id exchange".into()));
    }
    String::from_utf8(buf[..n].to_vec())
        .map_err(|e| NodeError::Handshake(format!("non-utf8 id: {}", e)))
}
