//! # App chain core
//!
//! Fundamental value types shared by the ledger, network and consensus crates.
//!
//! - `UInt160` / `UInt256`: script hashes and object hashes
//! - `Fixed8`: fixed-point asset amounts
//! - `KeyPair` / `PublicKey`: secp256r1 signing keys
//! - `Transaction`, `Header`, `Block`, `TrimmedBlock`: ledger objects with
//!   their hashes computed once at construction
//! - `ConsensusPayload`: the signed envelope carrying dBFT messages
//!
//! ## Example
//!
//! ```rust
//! use appchain_core::{UInt160, UInt256};
//!
//! let hash = UInt256::zero();
//! assert!(hash.is_zero());
//!
//! let script_hash: UInt160 = "0x0000000000000000000000000000000000000001".parse().unwrap();
//! assert!(!script_hash.is_zero());
//! ```

pub mod block;
pub mod consensus_payload;
pub mod crypto;
pub mod fixed8;
pub mod inventory;
pub mod merkle;
pub mod relay_result;
pub mod script;
pub mod transaction;
mod uint;
pub mod witness;

pub use block::{Block, Header, TrimmedBlock};
pub use consensus_payload::ConsensusPayload;
pub use crypto::{hash160, hash256, sha256, KeyPair, PublicKey, SIGNATURE_SIZE};
pub use fixed8::Fixed8;
pub use inventory::{Inventory, InventoryType, PeerId};
pub use relay_result::RelayResultReason;
pub use transaction::{Transaction, TransactionAttribute, TransactionData, TransactionOutput, TransactionType};
pub use uint::{UInt160, UInt256};
pub use witness::Witness;

use thiserror::Error;

/// Errors produced by core value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed textual or binary input.
    #[error("Invalid format: {message}")]
    InvalidFormat {
        /// Error message.
        message: String,
    },

    /// Key material could not be parsed.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Error message.
        message: String,
    },

    /// Arithmetic overflowed the fixed-point range.
    #[error("Arithmetic overflow")]
    Overflow,

    /// Binary decoding failed.
    #[error(transparent)]
    Io(#[from] appchain_io::IoError),
}

impl CoreError {
    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key<S: Into<String>>(message: S) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
