//! A single live peer connection: the write half callers broadcast onto,
//! plus whatever a session has handed in as its current consensus
//! candidates. The socket is an owned `TcpStream` clone guarded by a
//! mutex, one per direction, matching the thread-per-connection model the
//! rest of this crate uses.

use std::net::{Shutdown, TcpStream};

use parking_lot::Mutex;

use crate::envelope::Envelope;
use crate::error::{NodeError, Result};
use crate::framing;

/// Address a session was reached at (for outbound sessions, what we
/// dialed; for inbound, the handshake-announced host is unknown until the
/// peer tells us, so inbound sessions record the sockets's peer address).
#[derive(Debug, Clone)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

pub struct PeerSession {
    pub id: String,
    pub addr: PeerAddress,
    writer: Mutex<TcpStream>,
    raw: TcpStream,
    candidate_block: Mutex<Option<Envelope>>,
    candidate_block_hash: Mutex<Option<Envelope>>,
}

impl PeerSession {
    pub fn new(stream: TcpStream, id: String, addr: PeerAddress) -> Result<Self> {
        let writer = stream.try_clone().map_err(NodeError::Io)?;
        Ok(Self {
            id,
            addr,
            writer: Mutex::new(writer),
            raw: stream,
            candidate_block: Mutex::new(None),
            candidate_block_hash: Mutex::new(None),
        })
    }

    /// A fresh handle to the socket, for a reader thread to own.
    pub fn reader_stream(&self) -> Result<TcpStream> {
        self.raw.try_clone().map_err(NodeError::Io)
    }

    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut writer = self.writer.lock();
        framing::write_frame(&mut *writer, envelope)
    }

    pub fn set_candidate_block(&self, envelope: Envelope) {
        *self.candidate_block.lock() = Some(envelope);
    }

    pub fn set_candidate_block_hash(&self, envelope: Envelope) {
        *self.candidate_block_hash.lock() = Some(envelope);
    }

    pub fn candidate_block(&self) -> Option<Envelope> {
        self.candidate_block.lock().clone()
    }

    pub fn candidate_block_hash(&self) -> Option<Envelope> {
        self.candidate_block_hash.lock().clone()
    }

    /// Close the socket from both directions. Unblocks the reader thread's
    /// blocking `read_frame` call, which observes this as a clean EOF.
    pub fn close(&self) {
        let _ = self.raw.shutdown(Shutdown::Both);
    }
}
