//! App chain consensus
//!
//! Delegated Byzantine fault tolerant block production for one chain.
//!
//! ## Components
//!
//! - **ConsensusMessage**: ChangeView, PrepareRequest and PrepareResponse,
//!   carried in the data of a `ConsensusPayload`
//! - **ConsensusContext**: per-height round state (role, view, signatures)
//! - **ConsensusService**: the synchronous state machine; emits
//!   `ConsensusEvent`s instead of touching the network
//! - **ConsensusActor**: drives the service from a priority mailbox and
//!   turns its events into relays and timers
//!
//! ## Round outline
//!
//! The primary for `(height, view)` proposes a block after the block time
//! has elapsed. Backups check the proposal, sign the header and answer with
//! their signature. Any node holding `M` signatures assembles the block with
//! a multi-signature witness and relays it. A validator that times out asks
//! for the next view; `M` matching requests move everyone there.

pub mod actor;
pub mod context;
pub mod message_type;
pub mod messages;
pub mod service;

pub use actor::{ConsensusActor, ConsensusCommand};
pub use context::{primary_index, quorum, ConsensusContext, Role, RoundFlags};
pub use message_type::ConsensusMessageType;
pub use messages::{ChangeView, ConsensusMessage, PrepareRequest, PrepareResponse};
pub use service::{ConsensusEvent, ConsensusService, ConsensusTimer};

use appchain_io::IoError;
use appchain_ledger::LedgerError;
use std::time::Duration;
use thiserror::Error;

/// Version field of every consensus payload.
pub const CONSENSUS_VERSION: u32 = 0;

/// How far ahead of local time a proposal timestamp may be.
pub const MAX_FUTURE_TIMESTAMP: Duration = Duration::from_secs(600);

/// Result type for consensus operations
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

/// Consensus-specific error types
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Malformed message bytes
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Unknown message type byte
    #[error("Unknown consensus message type {0:#04x}")]
    UnknownMessageType(u8),

    /// Structurally invalid message
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Ledger lookup failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The chain has no persisted block to build on
    #[error("Chain not initialized")]
    ChainNotInitialized,

    /// This node does not hold a validator key for the round
    #[error("Not a validator")]
    NotValidator,

    /// The round is not in a state that allows the operation
    #[error("Invalid round state: {0}")]
    InvalidState(&'static str),
}

impl ConsensusError {
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::InvalidFormat(message.into())
    }
}
