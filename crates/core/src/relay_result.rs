//! Relay result types.
//!
//! The outcome reported synchronously to whatever submitted a block,
//! transaction or consensus payload.

use std::fmt;

/// Result of handing an inventory to the blockchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayResultReason {
    /// Accepted.
    Succeed,
    /// Already persisted, being persisted, cached or pooled.
    AlreadyExists,
    /// The memory pool is full.
    OutOfMemory,
    /// The previous block is not yet known, so the block was buffered.
    UnableToVerify,
    /// Failed verification.
    Invalid,
    /// Rejected by the policy plugin.
    PolicyFail,
    /// Any other failure.
    #[default]
    Unknown,
}

impl RelayResultReason {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeed)
    }
}

impl From<u8> for RelayResultReason {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Succeed,
            1 => Self::AlreadyExists,
            2 => Self::OutOfMemory,
            3 => Self::UnableToVerify,
            4 => Self::Invalid,
            5 => Self::PolicyFail,
            _ => Self::Unknown,
        }
    }
}

impl From<RelayResultReason> for u8 {
    fn from(result: RelayResultReason) -> Self {
        result as u8
    }
}

impl fmt::Display for RelayResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeed => write!(f, "Succeed"),
            Self::AlreadyExists => write!(f, "AlreadyExists"),
            Self::OutOfMemory => write!(f, "OutOfMemory"),
            Self::UnableToVerify => write!(f, "UnableToVerify"),
            Self::Invalid => write!(f, "Invalid"),
            Self::PolicyFail => write!(f, "PolicyFail"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
