//! Shared read view of one chain.
//!
//! `Chain` is what other actors see of the ledger: the committed snapshot,
//! the header index and the persisted height. Only the blockchain actor
//! and the persistor change it.

use crate::executor::ScriptExecutor;
use crate::genesis;
use crate::mempool::MemoryPool;
use crate::policy::PolicyPlugin;
use crate::store::{Snapshot, Store};
use crate::validators;
use crate::{LedgerResult, HEADER_CHECKPOINT_INTERVAL};
use appchain_config::ProtocolSettings;
use appchain_core::{Block, Header, PublicKey, Transaction, UInt256};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct Chain {
    settings: Arc<ProtocolSettings>,
    store: Arc<dyn Store>,
    mempool: Arc<MemoryPool>,
    executor: Arc<dyn ScriptExecutor>,
    policy: Arc<dyn PolicyPlugin>,
    utility_token: UInt256,
    snapshot: RwLock<Snapshot>,
    header_index: RwLock<Vec<UInt256>>,
    height: AtomicU32,
    checkpointed_headers: usize,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.settings.name)
            .field("height", &self.height())
            .field("header_height", &self.header_height())
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// Loads the header index and height from `store`.
    ///
    /// The index is rebuilt from the header hash list checkpoints, then
    /// extended by walking back from the current header through the stored
    /// headers.
    pub fn open(
        settings: Arc<ProtocolSettings>,
        store: Arc<dyn Store>,
        mempool: Arc<MemoryPool>,
        executor: Arc<dyn ScriptExecutor>,
        policy: Arc<dyn PolicyPlugin>,
    ) -> LedgerResult<Self> {
        let snapshot = store.snapshot();
        let mut header_index: Vec<UInt256> = snapshot
            .header_hash_lists()?
            .into_iter()
            .flat_map(|list| list.hashes)
            .collect();
        let checkpointed_headers = header_index.len();

        let height = match snapshot.current_block()? {
            Some(current) => current.index,
            None => 0,
        };
        if let Some(current_header) = snapshot.current_header()? {
            let mut tail = Vec::new();
            let mut hash = current_header.hash;
            let mut index = current_header.index as usize;
            while index >= header_index.len() {
                let header = snapshot
                    .get_header(&hash)?
                    .ok_or_else(|| crate::LedgerError::not_found(format!("header {hash}")))?;
                tail.push(hash);
                hash = header.prev_hash();
                if index == 0 {
                    break;
                }
                index -= 1;
            }
            tail.reverse();
            header_index.extend(tail);
            info!(
                chain = %settings.name,
                height,
                header_height = current_header.index,
                "ledger loaded"
            );
        }

        Ok(Self {
            utility_token: genesis::utility_token_id(&settings),
            settings,
            store,
            mempool,
            executor,
            policy,
            snapshot: RwLock::new(snapshot),
            header_index: RwLock::new(header_index),
            height: AtomicU32::new(height),
            checkpointed_headers,
        })
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn settings_arc(&self) -> Arc<ProtocolSettings> {
        self.settings.clone()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn mempool(&self) -> &Arc<MemoryPool> {
        &self.mempool
    }

    pub fn executor(&self) -> &Arc<dyn ScriptExecutor> {
        &self.executor
    }

    pub fn policy(&self) -> &Arc<dyn PolicyPlugin> {
        &self.policy
    }

    pub fn utility_token(&self) -> UInt256 {
        self.utility_token
    }

    /// Whether block 0 has been persisted.
    pub fn is_initialized(&self) -> bool {
        !self.header_index.read().is_empty()
    }

    /// Height of the last persisted block.
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Index of the last known header.
    pub fn header_height(&self) -> u32 {
        (self.header_index.read().len() as u32).saturating_sub(1)
    }

    pub fn header_count(&self) -> usize {
        self.header_index.read().len()
    }

    pub fn header_hash(&self, index: u32) -> Option<UInt256> {
        self.header_index.read().get(index as usize).copied()
    }

    pub fn current_block_hash(&self) -> Option<UInt256> {
        self.header_hash(self.height())
    }

    pub fn current_header_hash(&self) -> Option<UInt256> {
        self.header_index.read().last().copied()
    }

    /// Copy of the committed snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    pub fn contains_block(&self, hash: &UInt256) -> bool {
        self.snapshot.read().contains_block(hash).unwrap_or(false)
    }

    /// Whether `hash` is pooled or persisted.
    pub fn contains_transaction(&self, hash: &UInt256) -> bool {
        self.mempool.contains(hash) || self.snapshot.read().contains_transaction(hash)
    }

    pub fn get_block(&self, hash: &UInt256) -> LedgerResult<Option<Block>> {
        self.snapshot.read().get_block(hash)
    }

    pub fn get_block_by_index(&self, index: u32) -> LedgerResult<Option<Block>> {
        match self.header_hash(index) {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    pub fn get_header(&self, hash: &UInt256) -> LedgerResult<Option<Header>> {
        self.snapshot.read().get_header(hash)
    }

    /// Pooled or persisted transaction.
    pub fn get_transaction(&self, hash: &UInt256) -> LedgerResult<Option<Transaction>> {
        if let Some(tx) = self.mempool.try_get(hash) {
            return Ok(Some(tx));
        }
        self.snapshot.read().get_transaction(hash)
    }

    /// Header hashes following `hash_start` up to and including `hash_stop`
    /// (or `max` entries), used to answer `getblocks` and `getheaders`.
    pub fn hashes_after(&self, hash_start: &UInt256, hash_stop: &UInt256, max: usize) -> Vec<UInt256> {
        let index = self.header_index.read();
        let Some(start) = index.iter().position(|hash| hash == hash_start) else {
            return Vec::new();
        };
        let mut hashes = Vec::new();
        for hash in index.iter().skip(start + 1).take(max) {
            hashes.push(*hash);
            if hash == hash_stop {
                break;
            }
        }
        hashes
    }

    /// Validators that must sign the next block if it contains `others`.
    pub fn get_validators(&self, others: &[Transaction]) -> LedgerResult<Vec<PublicKey>> {
        let snapshot = self.snapshot();
        validators::get_validators(&snapshot, &self.settings, others, self.executor.as_ref())
    }

    /// Current validators, ignoring pending changes.
    pub fn validators(&self) -> LedgerResult<Vec<PublicKey>> {
        validators::standby_validators(&self.snapshot.read(), &self.settings)
    }

    pub(crate) fn checkpointed_headers(&self) -> usize {
        self.checkpointed_headers
    }

    /// Header hashes `[from, from + HEADER_CHECKPOINT_INTERVAL)` when all are
    /// known.
    pub(crate) fn header_checkpoint(&self, from: usize) -> Option<Vec<UInt256>> {
        let index = self.header_index.read();
        index
            .get(from..from + HEADER_CHECKPOINT_INTERVAL)
            .map(<[UInt256]>::to_vec)
    }

    pub(crate) fn push_header(&self, hash: UInt256) {
        self.header_index.write().push(hash);
    }

    /// Installs the snapshot committed for block `height`.
    pub(crate) fn set_persisted(&self, height: u32, snapshot: Snapshot) {
        *self.snapshot.write() = snapshot;
        self.height.store(height, Ordering::Release);
    }
}
