//! Actor support types.

pub mod priority_mailbox;
