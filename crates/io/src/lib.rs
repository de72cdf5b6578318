//! App chain IO
//!
//! Little-endian binary encoding shared by every wire and storage format of the
//! node, plus the priority mailbox the actors are built on.
//!
//! ## Components
//!
//! - **BinaryWriter / MemoryReader**: primitive and var-length encoding
//! - **Serializable**: the encode/decode contract implemented by payloads
//! - **PriorityMailbox**: two-lane actor inbox with superseded-command collapse

pub mod actors;
mod binary_writer;
mod memory_reader;
pub mod serializable;

pub use actors::priority_mailbox::{MailboxClosed, MailboxMessage, MailboxSender, PriorityMailbox};
pub use binary_writer::BinaryWriter;
pub use memory_reader::MemoryReader;
pub use serializable::{helper, Serializable, SerializableExt};

use thiserror::Error;

/// Errors raised while decoding binary data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Fewer bytes remained than the field needs.
    #[error("Unexpected end of stream: needed {needed} bytes, {remaining} remaining")]
    EndOfStream {
        /// Bytes requested.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A length prefix exceeded its allowed maximum.
    #[error("Length {value} exceeds maximum {max}")]
    Overflow {
        /// Decoded value.
        value: u64,
        /// Allowed maximum.
        max: u64,
    },

    /// Structurally invalid data.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl IoError {
    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::InvalidFormat(message.into())
    }
}

/// Result type for IO operations.
pub type IoResult<T> = std::result::Result<T, IoError>;
