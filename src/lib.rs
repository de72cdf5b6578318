//! # App chain node
//!
//! Wiring for a node that runs the root chain and any number of app chains
//! side by side. Each chain gets its own ledger, relay and consensus actors;
//! the chains find each other through an explicit [`ChainRegistry`] rather
//! than process-wide statics.
//!
//! ## Crates
//!
//! - `appchain-io`: binary codec and the priority mailbox used by every actor
//! - `appchain-core`: hashes, keys, transactions, blocks, consensus payloads
//! - `appchain-ledger`: store, memory pool, blockchain and persistor actors
//! - `appchain-network`: peer protocol, task manager, local node
//! - `appchain-consensus`: the dBFT service and its actor
//!
//! ## Example
//!
//! ```no_run
//! use appchain_config::ProtocolSettings;
//! use appchain_ledger::MemoryStore;
//! use appchain_node::{ChainCollaborators, ChainRegistry, ChainSystem};
//! use std::sync::Arc;
//!
//! # async fn run(settings: ProtocolSettings) -> anyhow::Result<()> {
//! let registry = Arc::new(ChainRegistry::new());
//! let root = ChainSystem::start(
//!     settings,
//!     Arc::new(MemoryStore::new()),
//!     None,
//!     ChainCollaborators::default(),
//!     &registry,
//! )
//! .await?;
//! root.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod app_chain_manager;
pub mod event_bus;
pub mod logging;
pub mod registry;
pub mod system;

pub use app_chain_manager::{AppChainLauncher, AppChainManager, SystemLauncher};
pub use event_bus::AppChainEventBus;
pub use registry::ChainRegistry;
pub use system::{stop_chain, ChainCollaborators, ChainSystem, StoreFactory};

pub use appchain_config as config;
pub use appchain_consensus as consensus;
pub use appchain_core as core;
pub use appchain_io as io;
pub use appchain_ledger as ledger;
pub use appchain_network as network;

use appchain_core::UInt256;
use thiserror::Error;

/// Node library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type for node operations
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Node-level error types
#[derive(Error, Debug)]
pub enum NodeError {
    /// A chain with this hash is already registered
    #[error("Chain {0} is already running")]
    AlreadyRunning(UInt256),

    /// No chain with this hash is registered
    #[error("Chain {0} is not running")]
    NotRunning(UInt256),

    /// Installing the global subscriber failed
    #[error("Logging initialization failed: {0}")]
    LoggingInit(String),
}
