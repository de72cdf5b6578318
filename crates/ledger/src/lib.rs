//! App chain ledger
//!
//! Ledger state for one chain and the actors that own it.
//!
//! ## Components
//!
//! - **Store / Snapshot**: key-value store with copy-on-write snapshots
//! - **MemoryPool**: verified and unverified pending transactions
//! - **Chain**: shared read view of heights, header index and snapshot
//! - **BlockPersistor**: the single writer that applies blocks to state
//! - **Blockchain**: actor ordering inbound blocks, headers and transactions
//! - **Validators**: validator-set resolution, including app chain changes

pub mod app_chain;
pub mod blockchain;
pub mod chain;
pub mod executor;
pub mod genesis;
pub mod mempool;
pub mod persistor;
pub mod policy;
pub mod state;
pub mod store;
pub mod validators;
pub mod verification;

pub use app_chain::{AppChainNotification, CHANGE_VALIDATORS_METHOD};
pub use blockchain::{
    Blockchain, BlockchainCommand, BlockchainHandle, LedgerEvent, NullRelay, RelayReply,
    RelaySink, GENESIS_TIMEOUT,
};
pub use chain::Chain;
pub use executor::{ExecutionResult, NoopExecutor, ScriptExecutor, StackItem, VmState};
pub use mempool::{MemPoolConfig, MemoryPool, ReverifyOutcome};
pub use persistor::{BlockPersistor, PersistCommand, PersistCompleted, PersistorHandle};
pub use policy::{AllowAllPolicy, PolicyPlugin, SimplePolicy};
pub use state::{AccountState, AppChainState, AssetState, HashIndexState, TransactionRecord};
pub use store::{MemoryStore, Snapshot, StorageKey, Store, Table};

use appchain_core::{CoreError, UInt160, UInt256};
use appchain_io::IoError;
use thiserror::Error;

/// Headers between two header hash list checkpoints.
pub const HEADER_CHECKPOINT_INTERVAL: usize = 2000;

/// Blocks this close to the header tip are relayed on arrival.
pub const RELAY_WINDOW: u32 = 100;

/// Maximum hashes in one grouped inventory announcement.
pub const MAX_INV_GROUP_HASHES: usize = 500;

/// Unverified transactions re-validated per `ReverifyMemPool` message.
pub const REVERIFY_BATCH_SIZE: usize = 1000;

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Ledger-specific error types
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// State record encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wire encoding failure
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Core type failure
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// A required record is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Block failed verification
    #[error("Invalid block {hash}: {reason}")]
    InvalidBlock { hash: UInt256, reason: String },

    /// Transaction failed verification
    #[error("Invalid transaction {hash}: {reason}")]
    InvalidTransaction { hash: UInt256, reason: String },

    /// Insufficient balance
    #[error("Insufficient balance for account {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: UInt160,
        required: i64,
        available: i64,
    },

    /// Actor mailbox closed or reply dropped
    #[error("Actor unavailable: {0}")]
    ActorUnavailable(&'static str),

    /// Timed out waiting for an actor reply
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl LedgerError {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_block<S: Into<String>>(hash: UInt256, reason: S) -> Self {
        Self::InvalidBlock {
            hash,
            reason: reason.into(),
        }
    }

    pub fn invalid_transaction<S: Into<String>>(hash: UInt256, reason: S) -> Self {
        Self::InvalidTransaction {
            hash,
            reason: reason.into(),
        }
    }
}
