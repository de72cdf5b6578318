//! Network payloads.

mod compressed;
mod get_blocks;
mod headers;
mod inv;
mod version;

pub use compressed::CompressedTransactionsPayload;
pub use get_blocks::GetBlocksPayload;
pub use headers::HeadersPayload;
pub use inv::{InvGroupPayload, InvPayload};
pub use version::{PingPayload, VersionPayload};
