//! Outbound announcers: the messages this node originates rather than
//! relays — candidate block, candidate block hash, and a freshly submitted
//! transaction. Each takes an explicit `NodeHandle` rather than reaching
//! for a global server instance.

use serde_json::json;

use crate::server::NodeHandle;
use crate::state::{StateStore, Transaction};

/// Emit `{action: "myblock", transaction: [...], sequance_number}` to
/// every live peer, but only while the local block is in round-1
/// pre-commit.
pub fn announce_candidate_block(handle: &NodeHandle, state: &dyn StateStore, transactions: &[Transaction]) {
    if !state.in_round_one_precommit() {
        return;
    }
    let current = state.current_block();
    let envelope = crate::envelope::Envelope::new("myblock")
        .with_field("transaction", json!(transactions))
        .with_field("sequance_number", current.sequence_number);
    handle.broadcast(envelope, None);
}

/// Emit `{action: "myblockhash", hash, sequance_number}`, gated on round 1
/// having started but round 2 not yet having begun.
pub fn announce_candidate_block_hash(handle: &NodeHandle, state: &dyn StateStore, hash: &str) {
    if !state.in_round_one_not_two() {
        return;
    }
    let current = state.current_block();
    let envelope = crate::envelope::Envelope::new("myblockhash")
        .with_field("hash", hash)
        .with_field("sequance_number", current.sequence_number);
    handle.broadcast(envelope, None);
}

/// Submit a locally-originated transaction to every peer. Inbound
/// `transactionrequest` handling (reconstruct, apply, conditional relay)
/// lives in `router`; this is only the first hop.
pub fn submit_transaction(handle: &NodeHandle, tx: &Transaction) {
    let envelope = crate::envelope::Envelope::new("transactionrequest")
        .with_field("sequance_number", tx.sequance_number)
        .with_field("txsignature", tx.txsignature.clone())
        .with_field("fromUser", tx.from_user.clone())
        .with_field("to_user", tx.to_user.clone())
        .with_field("data", tx.data.clone())
        .with_field("amount", tx.amount)
        .with_field("transaction_fee", tx.transaction_fee)
        .with_field("transaction_time", tx.transaction_time);
    handle.broadcast(envelope, None);
}
