//! Relayable inventory and the identifiers used to announce it.

use crate::{Block, ConsensusPayload, Transaction, UInt256};
use appchain_io::{BinaryWriter, SerializableExt};
use std::fmt;

/// Inventory type tag used in `inv`/`getdata` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InventoryType {
    Transaction = 0x01,
    Block = 0x02,
    Consensus = 0xE0,
}

impl InventoryType {
    #[must_use]
    pub const fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Transaction),
            0x02 => Some(Self::Block),
            0xE0 => Some(Self::Consensus),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }

    /// Message command carrying a full object of this type.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::Transaction => "tx",
            Self::Block => "block",
            Self::Consensus => "consensus",
        }
    }
}

impl fmt::Display for InventoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Identifies a connected peer within one chain's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A block, transaction or consensus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inventory {
    Block(Block),
    Transaction(Transaction),
    Consensus(ConsensusPayload),
}

impl Inventory {
    pub fn hash(&self) -> UInt256 {
        match self {
            Self::Block(block) => block.hash(),
            Self::Transaction(tx) => tx.hash(),
            Self::Consensus(payload) => payload.hash(),
        }
    }

    pub fn inventory_type(&self) -> InventoryType {
        match self {
            Self::Block(_) => InventoryType::Block,
            Self::Transaction(_) => InventoryType::Transaction,
            Self::Consensus(_) => InventoryType::Consensus,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Block(block) => block.to_array(),
            Self::Transaction(tx) => tx.to_array(),
            Self::Consensus(payload) => payload.to_array(),
        }
    }

    pub fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            Self::Block(block) => writer.write_serializable(block),
            Self::Transaction(tx) => writer.write_serializable(tx),
            Self::Consensus(payload) => writer.write_serializable(payload),
        }
    }
}

impl From<Block> for Inventory {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

impl From<Transaction> for Inventory {
    fn from(tx: Transaction) -> Self {
        Self::Transaction(tx)
    }
}

impl From<ConsensusPayload> for Inventory {
    fn from(payload: ConsensusPayload) -> Self {
        Self::Consensus(payload)
    }
}
