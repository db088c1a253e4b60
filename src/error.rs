use thiserror::Error;

/// Errors produced by the networking core. Every variant is recoverable at
/// session granularity — nothing here should terminate the process.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("envelope signature did not verify")]
    InvalidSignature,

    #[error("peer {0} is not a member of the UNL")]
    NotUnl(String),

    #[error("already connected to {0}:{1}")]
    AlreadyConnected(String, u16),

    #[error("i/o timed out")]
    IoTimeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("ingest gate closed for stream {0}")]
    IngestGateClosed(&'static str),

    #[error("stale sequence number")]
    StaleSequenceNumber,

    #[error("peer registry error: {0}")]
    Registry(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("signing key error: {0}")]
    Key(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
