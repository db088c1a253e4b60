//! Action dispatcher: verifies every inbound envelope, then routes on
//! `action`. Implements this crate's `Dispatch` trait so `server.rs`
//! never depends on it directly.

use std::sync::Arc;

use crate::bulk::{BulkEngine, StreamKind};
use crate::envelope::Envelope;
use crate::error::NodeError;
use crate::identity;
use crate::server::{Dispatch, NodeHandle};
use crate::session::PeerSession;
use crate::state::{ConsensusScheduler, StateStore, Transaction};

pub struct Router {
    state: Arc<dyn StateStore>,
    scheduler: Arc<dyn ConsensusScheduler>,
    bulk: BulkEngine,
}

impl Router {
    pub fn new(state: Arc<dyn StateStore>, scheduler: Arc<dyn ConsensusScheduler>, bulk: BulkEngine) -> Self {
        Self {
            state,
            scheduler,
            bulk,
        }
    }
}

impl Dispatch for Router {
    fn dispatch(&self, handle: &NodeHandle, session: &Arc<PeerSession>, envelope: Envelope) {
        if !identity::verify(&envelope) {
            tracing::warn!(peer = %session.id, "dropping envelope with invalid signature");
            return;
        }

        let action = match envelope.action() {
            Some(a) => a.to_string(),
            None => return,
        };

        match action.as_str() {
            "sendmefullblock" => self.handle_sendmefullblock(handle, session),
            "fullblock" => self.handle_chunk(StreamKind::Block, session, &envelope),
            "fullaccounts" => self.handle_chunk(StreamKind::Accounts, session, &envelope),
            "fullblockshash" => self.handle_chunk(StreamKind::BlockshashIndex, session, &envelope),
            "fullblockshash_part" => self.handle_chunk(StreamKind::BlockshashPart, session, &envelope),
            "transactionrequest" => self.handle_transaction(handle, session, envelope),
            "myblock" => self.handle_myblock(session, &envelope),
            "myblockhash" => self.handle_myblockhash(session, &envelope),
            other => tracing::debug!(action = %other, peer = %session.id, "ignoring unknown action"),
        }
    }
}

impl Router {
    /// `sendmefullblock`: stream all four artifacts back to the requester,
    /// in BLOCK, ACCOUNTS, BLOCKSHASH, BLOCKSHASH_PART order.
    fn handle_sendmefullblock(&self, handle: &NodeHandle, session: &Arc<PeerSession>) {
        for kind in StreamKind::ALL {
            let result = self.bulk.send_stream(kind, |env| {
                let signed = handle.identity().sign(env);
                session.send(&signed)
            });
            if let Err(e) = result {
                tracing::warn!(peer = %session.id, stream = kind.chunk_action(), error = %e, "full-stream send failed");
            }
        }
    }

    fn handle_chunk(&self, kind: StreamKind, session: &Arc<PeerSession>, envelope: &Envelope) {
        let byte = match envelope.field("byte").and_then(|v| v.as_str()) {
            Some(b) => b,
            None => {
                tracing::warn!(peer = %session.id, action = kind.chunk_action(), "chunk envelope missing byte field");
                return;
            }
        };
        if let Err(e) = self.bulk.recv_chunk(kind, &session.id, byte, self.state.as_ref(), self.scheduler.as_ref()) {
            match e {
                NodeError::IngestGateClosed(stream) => {
                    tracing::debug!(peer = %session.id, stream, "ingest gate closed chunk");
                }
                other => tracing::warn!(peer = %session.id, error = %other, "chunk ingest failed"),
            }
        }
    }

    fn handle_transaction(&self, handle: &NodeHandle, session: &Arc<PeerSession>, envelope: Envelope) {
        let tx = match transaction_from_envelope(&envelope) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(peer = %session.id, error = %e, "malformed transaction request");
                return;
            }
        };
        if self.state.apply_transaction(&tx) {
            handle.broadcast(envelope, Some(&session.id));
            self.state.save_block();
        } else {
            tracing::debug!(peer = %session.id, "transaction rejected by state store");
        }
    }

    /// `myblock`: record the candidate block on the sender's session.
    /// Rejects (with a log line) if the proposal's sequence number does
    /// not match the block currently being assembled.
    fn handle_myblock(&self, session: &Arc<PeerSession>, envelope: &Envelope) {
        let proposed = envelope.field("sequance_number").and_then(|v| v.as_u64());
        let current = self.state.current_block().sequence_number;
        if proposed != Some(current) {
            tracing::info!(
                peer = %session.id, proposed = ?proposed, current,
                "rejecting candidate block with stale sequence number"
            );
            return;
        }
        session.set_candidate_block(envelope.clone());
    }

    /// `myblockhash`: same acceptance rule as `myblock`, but drops
    /// silently on mismatch. On acceptance, stamps `sender` with the
    /// session id before storing.
    fn handle_myblockhash(&self, session: &Arc<PeerSession>, envelope: &Envelope) {
        let proposed = envelope.field("sequance_number").and_then(|v| v.as_u64());
        let current = self.state.current_block().sequence_number;
        if proposed != Some(current) {
            return;
        }
        let mut stamped = envelope.clone();
        stamped.set_field("sender", serde_json::Value::String(session.id.clone()));
        session.set_candidate_block_hash(stamped);
    }
}

fn transaction_from_envelope(envelope: &Envelope) -> crate::error::Result<Transaction> {
    const FIELDS: [&str; 8] = [
        "sequance_number",
        "txsignature",
        "fromUser",
        "to_user",
        "data",
        "amount",
        "transaction_fee",
        "transaction_time",
    ];
    let mut map = serde_json::Map::new();
    for key in FIELDS {
        if let Some(value) = envelope.field(key) {
            map.insert(key.to_string(), value.clone());
        }
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| NodeError::MalformedEnvelope(format!("transactionrequest: {}", e)))
}
