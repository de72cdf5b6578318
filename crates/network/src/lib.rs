//! App chain network
//!
//! Peer-to-peer relay and synchronisation for one chain.
//!
//! ## Components
//!
//! - **payloads**: inventory announcements, header and block requests,
//!   compressed transaction batches, handshake payloads
//! - **Message**: the closed set of protocol commands and their framing
//! - **TaskManager**: de-duplicated inventory requests across peers and
//!   header/block catch-up
//! - **LocalNode**: peer registry and outbound relay, the ledger's
//!   `RelaySink`
//! - **RemoteNode**: one connection, with its `ProtocolHandler`

pub mod connection;
pub mod framing;
pub mod local_node;
pub mod message;
pub mod payloads;
pub mod protocol_handler;
pub mod remote_node;
pub mod task_manager;

pub use local_node::{listen, LocalNode, LocalNodeCommand, LocalNodeHandle, PeerStream, RelayCache};
pub use message::Message;
pub use payloads::{
    CompressedTransactionsPayload, GetBlocksPayload, HeadersPayload, InvGroupPayload, InvPayload,
    PingPayload, VersionPayload,
};
pub use protocol_handler::ProtocolHandler;
pub use remote_node::{RemoteCommand, RemoteNode};
pub use task_manager::{TaskCommand, TaskManager, TaskSession, HEADER_TASK};

use appchain_io::IoError;
use appchain_ledger::LedgerError;
use std::time::Duration;
use thiserror::Error;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 0;

/// Largest accepted message payload.
pub const MAX_PAYLOAD_SIZE: usize = 0x0200_0000;

/// Headers in one `headers` reply.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Block hashes announced in reply to one `getblocks`.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 500;

/// Transactions in one compressed batch.
pub const MAX_COMPRESSED_TRANSACTIONS: usize = 500;

/// An inventory request older than this is released for another peer.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// How often expired tasks are swept.
pub const TASK_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Recently relayed inventories served from memory to `getdata`.
pub const RELAY_CACHE_CAPACITY: usize = 100;

/// Result type for network operations
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Network-specific error types
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Malformed payload
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Socket failure
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer broke the protocol; the connection is closed
    #[error("Protocol violation by {peer}: {reason}")]
    ProtocolViolation { peer: String, reason: String },

    /// Unknown message command
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Payload limits exceeded
    #[error("Payload too large: {size} exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Ledger lookup failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Actor mailbox closed
    #[error("Actor unavailable: {0}")]
    ActorUnavailable(&'static str),
}

impl NetworkError {
    pub fn protocol_violation<P: ToString, S: Into<String>>(peer: P, reason: S) -> Self {
        Self::ProtocolViolation {
            peer: peer.to_string(),
            reason: reason.into(),
        }
    }
}
