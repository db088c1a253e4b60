//! External collaborators, modeled as traits so more than one concrete
//! backend can implement them. The block/transaction data model, fee
//! adjustment, persistent storage, and the consensus round timer are
//! supplied by the rest of the blockchain participant and arrive only
//! through these two trait boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of the block currently being synchronized, as returned by
/// `StateStore::current_block()`.
#[derive(Debug, Clone)]
pub struct CurrentBlockInfo {
    pub sequence_number: u64,
    pub download_source_id: String,
    pub consensus_timer: Duration,
}

/// A reconstructed transaction, built from a `transactionrequest`
/// envelope's fields. Field names mirror the wire schema exactly; they
/// are not renamed to Rust convention because the schema is fixed across
/// the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub sequance_number: u64,
    pub txsignature: String,
    #[serde(rename = "fromUser")]
    pub from_user: String,
    pub to_user: String,
    pub data: serde_json::Value,
    pub amount: u64,
    pub transaction_fee: u64,
    pub transaction_time: u64,
}

/// Opaque block/transaction/fee authority. The core treats every return
/// value as truth.
pub trait StateStore: Send + Sync {
    fn current_block(&self) -> CurrentBlockInfo;

    /// Persist the current block. Called once per completed BLOCK-stream
    /// round and once per accepted transaction relay.
    fn save_block(&self);

    /// Apply a reconstructed transaction to the current block; `true` if
    /// accepted (and therefore eligible for relay).
    fn apply_transaction(&self, tx: &Transaction) -> bool;

    /// Recompute the fee schedule after a full block ingest.
    fn change_transaction_fee(&self);

    /// Mark the freshly-renamed block as not yet processed by consensus.
    fn mark_newly_received(&self);

    /// Clear the block's excluded-validator set after a full re-ingest.
    fn clear_excluded_validators(&self);

    /// `true` while the local block is in round 1 pre-commit — gates the
    /// candidate-block announcer.
    fn in_round_one_precommit(&self) -> bool;

    /// `true` while in round 1 and not yet round 2 — gates the
    /// candidate-block-hash announcer.
    fn in_round_one_not_two(&self) -> bool;
}

/// External consensus round timer, armed once a full chain ingest
/// completes.
pub trait ConsensusScheduler: Send + Sync {
    /// Arm (or re-arm) a periodic trigger with the given period. Runs until
    /// cancelled by the scheduler's own owner; this crate never cancels it.
    fn arm(&self, period: Duration);
}
