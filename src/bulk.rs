//! Chunked transfer of the four blockchain state artifacts: 1024-byte
//! chunks, a terminating `"end"` sentinel, and a single-writer gate keyed
//! on the configured download source. Chunk bytes travel base64-encoded
//! inside the JSON envelope, a uniform, bit-exact wire representation.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::envelope::Envelope;
use crate::error::{NodeError, Result};
use crate::state::{ConsensusScheduler, StateStore};

const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Block,
    Accounts,
    BlockshashIndex,
    BlockshashPart,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Block,
        StreamKind::Accounts,
        StreamKind::BlockshashIndex,
        StreamKind::BlockshashPart,
    ];

    /// The envelope `action` carried by a chunk of this stream.
    pub fn chunk_action(self) -> &'static str {
        match self {
            StreamKind::Block => "fullblock",
            StreamKind::Accounts => "fullaccounts",
            StreamKind::BlockshashIndex => "fullblockshash",
            StreamKind::BlockshashPart => "fullblockshash_part",
        }
    }

    pub fn from_chunk_action(action: &str) -> Option<Self> {
        StreamKind::ALL.into_iter().find(|k| k.chunk_action() == action)
    }

    fn idx(self) -> usize {
        match self {
            StreamKind::Block => 0,
            StreamKind::Accounts => 1,
            StreamKind::BlockshashIndex => 2,
            StreamKind::BlockshashPart => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamPaths {
    pub loading: PathBuf,
    pub temp: PathBuf,
}

struct StreamRoundState {
    /// Set on construction and whenever an `"end"` sentinel completes a
    /// round. The next accepted chunk truncates `loading` instead of
    /// appending, so a new round never concatenates onto a stale one.
    needs_truncate: AtomicBool,
    write_lock: Mutex<()>,
}

pub struct BulkEngine {
    paths: [StreamPaths; 4],
    rounds: [StreamRoundState; 4],
}

impl BulkEngine {
    pub fn new(
        block: StreamPaths,
        accounts: StreamPaths,
        blockshash_index: StreamPaths,
        blockshash_part: StreamPaths,
    ) -> Self {
        Self {
            paths: [block, accounts, blockshash_index, blockshash_part],
            rounds: [(), (), (), ()].map(|_| StreamRoundState {
                needs_truncate: AtomicBool::new(true),
                write_lock: Mutex::new(()),
            }),
        }
    }

    fn paths_for(&self, kind: StreamKind) -> &StreamPaths {
        &self.paths[kind.idx()]
    }

    /// Read `temp` in 1024-byte chunks and hand each, base64-encoded, to
    /// `sink` as a `{action, byte}` envelope; finishes with one
    /// `{action, byte: "end"}`. `sink` decides how the envelope is
    /// delivered (signed and written to the requester).
    pub fn send_stream(
        &self,
        kind: StreamKind,
        mut sink: impl FnMut(Envelope) -> Result<()>,
    ) -> Result<()> {
        let path = &self.paths_for(kind).temp;
        let mut file = std::fs::File::open(path).map_err(NodeError::Io)?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).map_err(NodeError::Io)?;
            if n == 0 {
                break;
            }
            let chunk = BASE64.encode(&buf[..n]);
            sink(Envelope::new(kind.chunk_action()).with_field("byte", chunk))?;
        }
        sink(Envelope::new(kind.chunk_action()).with_field("byte", "end"))
    }

    /// Ingest one chunk. `sender_id` is the session's handshake id.
    /// `byte` is the envelope's `byte` field, either `"end"` or a base64
    /// payload. On success for the `Block` stream's `"end"`, the
    /// `StateStore`/`ConsensusScheduler` side effects run too.
    pub fn recv_chunk(
        &self,
        kind: StreamKind,
        sender_id: &str,
        byte: &str,
        state: &dyn StateStore,
        scheduler: &dyn ConsensusScheduler,
    ) -> Result<()> {
        let idx = kind.idx();
        let current = state.current_block();
        let temp_path = &self.paths[idx].temp;
        let ingest_ok = !temp_path.exists() || sender_id == current.download_source_id;
        if !ingest_ok {
            return Err(NodeError::IngestGateClosed(kind.chunk_action()));
        }

        let round = &self.rounds[idx];
        let _guard = round.write_lock.lock().expect("stream write lock poisoned");
        let loading_path = &self.paths[idx].loading;

        if byte == "end" {
            std::fs::rename(loading_path, temp_path).map_err(NodeError::Io)?;
            round.needs_truncate.store(true, Ordering::SeqCst);
            if matches!(kind, StreamKind::Block) {
                state.mark_newly_received();
                state.change_transaction_fee();
                state.clear_excluded_validators();
                scheduler.arm(current.consensus_timer);
                state.save_block();
            }
            return Ok(());
        }

        let bytes = BASE64
            .decode(byte)
            .map_err(|e| NodeError::MalformedEnvelope(format!("bad chunk encoding: {}", e)))?;

        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        if round.needs_truncate.swap(false, Ordering::SeqCst) {
            opts.truncate(true);
        } else {
            opts.append(true);
        }
        let mut file = opts.open(loading_path).map_err(NodeError::Io)?;
        file.write_all(&bytes).map_err(NodeError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{RecordingScheduler, RecordingStateStore};
    use crate::state::CurrentBlockInfo;
    use std::time::Duration;

    fn engine(dir: &std::path::Path) -> BulkEngine {
        let make = |name: &str| StreamPaths {
            loading: dir.join(format!("{}.loading", name)),
            temp: dir.join(format!("{}.temp", name)),
        };
        BulkEngine::new(
            make("block"),
            make("accounts"),
            make("blockshash"),
            make("blockshash_part"),
        )
    }

    #[test]
    fn chunk_then_end_produces_byte_exact_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = engine(dir.path());
        let store = RecordingStateStore::new(CurrentBlockInfo {
            sequence_number: 1,
            download_source_id: "A_pub".into(),
            consensus_timer: Duration::from_secs(5),
        });
        let scheduler = RecordingScheduler::new();

        bulk.recv_chunk(
            StreamKind::Accounts,
            "A_pub",
            &BASE64.encode(b"hello "),
            &store,
            &scheduler,
        )
        .unwrap();
        bulk.recv_chunk(
            StreamKind::Accounts,
            "A_pub",
            &BASE64.encode(b"world"),
            &store,
            &scheduler,
        )
        .unwrap();
        bulk.recv_chunk(StreamKind::Accounts, "A_pub", "end", &store, &scheduler)
            .unwrap();

        let committed = std::fs::read(dir.path().join("accounts.temp")).unwrap();
        assert_eq!(committed, b"hello world");
        assert_eq!(*store.save_block_calls.lock(), 0);
    }

    #[test]
    fn block_stream_end_triggers_state_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = engine(dir.path());
        let store = RecordingStateStore::new(CurrentBlockInfo {
            sequence_number: 1,
            download_source_id: "A_pub".into(),
            consensus_timer: Duration::from_secs(9),
        });
        let scheduler = RecordingScheduler::new();

        bulk.recv_chunk(
            StreamKind::Block,
            "A_pub",
            &BASE64.encode(b"block-bytes"),
            &store,
            &scheduler,
        )
        .unwrap();
        bulk.recv_chunk(StreamKind::Block, "A_pub", "end", &store, &scheduler)
            .unwrap();

        assert_eq!(*store.save_block_calls.lock(), 1);
        assert_eq!(*store.change_fee_calls.lock(), 1);
        assert_eq!(*store.newly_received_calls.lock(), 1);
        assert_eq!(*store.cleared_validators_calls.lock(), 1);
        assert_eq!(scheduler.arm_calls.lock().len(), 1);
        assert_eq!(scheduler.arm_calls.lock()[0], Duration::from_secs(9));
    }

    #[test]
    fn non_source_peer_is_gated_out_once_temp_exists() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = engine(dir.path());
        std::fs::write(dir.path().join("block.temp"), b"prior-round").unwrap();
        let store = RecordingStateStore::new(CurrentBlockInfo {
            sequence_number: 1,
            download_source_id: "A_pub".into(),
            consensus_timer: Duration::from_secs(5),
        });
        let scheduler = RecordingScheduler::new();

        let result = bulk.recv_chunk(
            StreamKind::Block,
            "C_pub",
            &BASE64.encode(b"intruder"),
            &store,
            &scheduler,
        );
        assert!(matches!(result, Err(NodeError::IngestGateClosed(_))));
    }

    #[test]
    fn new_round_truncates_rather_than_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = engine(dir.path());
        let store = RecordingStateStore::new(CurrentBlockInfo {
            sequence_number: 1,
            download_source_id: "A_pub".into(),
            consensus_timer: Duration::from_secs(5),
        });
        let scheduler = RecordingScheduler::new();

        bulk.recv_chunk(StreamKind::Accounts, "A_pub", &BASE64.encode(b"first-round"), &store, &scheduler).unwrap();
        bulk.recv_chunk(StreamKind::Accounts, "A_pub", "end", &store, &scheduler).unwrap();

        bulk.recv_chunk(StreamKind::Accounts, "A_pub", &BASE64.encode(b"second"), &store, &scheduler).unwrap();
        bulk.recv_chunk(StreamKind::Accounts, "A_pub", "end", &store, &scheduler).unwrap();

        let committed = std::fs::read(dir.path().join("accounts.temp")).unwrap();
        assert_eq!(committed, b"second");
    }

    #[test]
    fn send_stream_emits_chunks_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = engine(dir.path());
        std::fs::write(dir.path().join("block.temp"), vec![7u8; CHUNK_SIZE + 10]).unwrap();

        let mut seen = Vec::new();
        bulk.send_stream(StreamKind::Block, |env| {
            seen.push(env);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen.len(), 3); // two chunks + end
        assert_eq!(seen.last().unwrap().field("byte").and_then(|v| v.as_str()), Some("end"));
    }
}
