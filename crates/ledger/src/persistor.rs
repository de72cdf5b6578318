//! Block persistor actor.
//!
//! The only writer of a chain's store. Blocks arrive strictly in height
//! order from the blockchain actor; each is applied to a fresh snapshot and
//! committed in one batch. Headers ahead of the persisted height are stored
//! here too, so header and block writes never interleave.

use crate::app_chain::AppChainNotification;
use crate::blockchain::BlockchainCommand;
use crate::chain::Chain;
use crate::executor::ExecutionResult;
use crate::state::{AccountState, AssetState, HashIndexState, HeaderHashList};
use crate::store::{Snapshot, StorageKey};
use crate::validators::{is_change_validators, validators_from_stack};
use crate::{LedgerError, LedgerResult, HEADER_CHECKPOINT_INTERVAL};
use appchain_core::{Block, Fixed8, Header, Transaction, TransactionData, TrimmedBlock, UInt160, UInt256};
use appchain_io::{MailboxMessage, MailboxSender, PriorityMailbox};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands accepted by the persistor.
#[derive(Debug)]
pub enum PersistCommand {
    PersistBlock(Block),
    PersistHeaders(Vec<Header>),
    /// Persists block 0 and answers on `reply` instead of notifying the
    /// blockchain actor.
    PersistGenesis {
        block: Block,
        reply: oneshot::Sender<LedgerResult<PersistCompleted>>,
    },
}

impl MailboxMessage for PersistCommand {}

/// Reply for one committed block.
#[derive(Debug, Clone)]
pub struct PersistCompleted {
    pub block: Block,
    /// Notifications raised by the block's scripts, already applied to state.
    pub app_chain_notifications: Vec<AppChainNotification>,
    /// State as of this block.
    pub snapshot: Snapshot,
}

pub type PersistorHandle = MailboxSender<PersistCommand>;

pub struct BlockPersistor {
    chain: Arc<Chain>,
    mailbox: PriorityMailbox<PersistCommand>,
    blockchain: MailboxSender<BlockchainCommand>,
    /// Next block index to persist.
    next_index: u32,
    /// Index of the last stored header.
    header_index: Option<u32>,
    checkpointed_headers: usize,
}

impl BlockPersistor {
    pub fn new(
        chain: Arc<Chain>,
        mailbox: PriorityMailbox<PersistCommand>,
        blockchain: MailboxSender<BlockchainCommand>,
    ) -> LedgerResult<Self> {
        let snapshot = chain.snapshot();
        let next_index = match snapshot.current_block()? {
            Some(current) => current.index + 1,
            None => 0,
        };
        let header_index = snapshot.current_header()?.map(|state| state.index);
        let checkpointed_headers = chain.checkpointed_headers();
        Ok(Self {
            chain,
            mailbox,
            blockchain,
            next_index,
            header_index,
            checkpointed_headers,
        })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!(chain = %self.chain.settings().name, "block persistor stopped");
    }

    fn handle(&mut self, command: PersistCommand) {
        match command {
            PersistCommand::PersistBlock(block) => {
                let index = block.index();
                match self.persist_block(block) {
                    Ok(completed) => {
                        if self
                            .blockchain
                            .send(BlockchainCommand::PersistCompleted(completed))
                            .is_err()
                        {
                            warn!(index, "blockchain mailbox closed");
                        }
                    }
                    Err(e) => {
                        error!(index, error = %e, "failed to persist block");
                        panic!("failed to persist block {index}: {e}");
                    }
                }
            }
            PersistCommand::PersistHeaders(headers) => {
                if let Err(e) = self.persist_headers(&headers) {
                    error!(error = %e, "failed to persist headers");
                    panic!("failed to persist headers: {e}");
                }
            }
            PersistCommand::PersistGenesis { block, reply } => {
                let _ = reply.send(self.persist_block(block));
            }
        }
    }

    /// Applies and commits one block.
    ///
    /// # Panics
    ///
    /// Panics if `block` is not the next block in height order.
    pub fn persist_block(&mut self, block: Block) -> LedgerResult<PersistCompleted> {
        assert_eq!(
            block.index(),
            self.next_index,
            "blocks must be persisted in height order"
        );
        let mut snapshot = self.chain.store().snapshot();
        let mut notifications = Vec::new();

        snapshot.put_trimmed_block(&block.trim());
        for tx in block.transactions() {
            snapshot.put_transaction(block.index(), tx);
            self.apply_transaction(&mut snapshot, &block, tx, &mut notifications)?;
        }
        for notification in &notifications {
            notification.apply(&mut snapshot, block.header().timestamp())?;
        }

        let current = HashIndexState {
            hash: block.hash(),
            index: block.index(),
        };
        snapshot.set_current_block(&current)?;
        if self.header_index.map_or(true, |index| block.index() > index) {
            snapshot.set_current_header(&current)?;
            self.header_index = Some(block.index());
        }
        self.write_checkpoints(&mut snapshot)?;
        snapshot.commit(self.chain.store().as_ref())?;
        self.next_index += 1;

        info!(
            chain = %self.chain.settings().name,
            index = block.index(),
            hash = %block.hash(),
            transactions = block.transactions().len(),
            "block persisted"
        );
        Ok(PersistCompleted {
            block,
            app_chain_notifications: notifications,
            snapshot: self.chain.store().snapshot(),
        })
    }

    /// Stores headers beyond the persisted height.
    ///
    /// # Panics
    ///
    /// Panics if a header does not directly follow the last stored one.
    pub fn persist_headers(&mut self, headers: &[Header]) -> LedgerResult<()> {
        if headers.is_empty() {
            return Ok(());
        }
        let mut snapshot = self.chain.store().snapshot();
        for header in headers {
            let expected = self.header_index.map_or(0, |index| index + 1);
            assert_eq!(
                header.index(),
                expected,
                "headers must be persisted in height order"
            );
            if snapshot.get_trimmed_block(&header.hash())?.is_none() {
                snapshot.put_trimmed_block(&TrimmedBlock::header_only(header.clone()));
            }
            snapshot.set_current_header(&HashIndexState {
                hash: header.hash(),
                index: header.index(),
            })?;
            self.header_index = Some(header.index());
        }
        self.write_checkpoints(&mut snapshot)?;
        snapshot.commit(self.chain.store().as_ref())?;
        debug!(count = headers.len(), header_height = ?self.header_index, "headers persisted");
        Ok(())
    }

    fn write_checkpoints(&mut self, snapshot: &mut Snapshot) -> LedgerResult<()> {
        while let Some(hashes) = self.chain.header_checkpoint(self.checkpointed_headers) {
            let checkpoint = (self.checkpointed_headers / HEADER_CHECKPOINT_INTERVAL) as u32;
            snapshot.put(
                &StorageKey::header_hash_list(checkpoint),
                &HeaderHashList { hashes },
            )?;
            self.checkpointed_headers += HEADER_CHECKPOINT_INTERVAL;
            debug!(checkpoint, "header hash list checkpoint written");
        }
        Ok(())
    }

    fn credit(snapshot: &mut Snapshot, to: &UInt160, asset_id: UInt256, value: Fixed8) -> LedgerResult<()> {
        snapshot.get_and_change(
            &StorageKey::account(to),
            || AccountState::new(*to),
            |account| account.credit(asset_id, value),
        )
    }

    fn debit(snapshot: &mut Snapshot, from: &UInt160, asset_id: UInt256, value: Fixed8) -> LedgerResult<bool> {
        snapshot.get_and_change(
            &StorageKey::account(from),
            || AccountState::new(*from),
            |account| account.debit(asset_id, value),
        )
    }

    fn apply_transaction(
        &self,
        snapshot: &mut Snapshot,
        block: &Block,
        tx: &Transaction,
        notifications: &mut Vec<AppChainNotification>,
    ) -> LedgerResult<()> {
        match tx.data() {
            TransactionData::Miner { outputs } => {
                for output in outputs {
                    Self::credit(snapshot, &output.script_hash, output.asset_id, output.value)?;
                }
            }
            TransactionData::Register {
                name,
                precision,
                amount,
                owner,
            } => {
                if block.index() != 0 {
                    warn!(tx = %tx.hash(), "asset registration outside genesis ignored");
                    return Ok(());
                }
                snapshot.put(
                    &StorageKey::asset(&tx.hash()),
                    &AssetState {
                        asset_id: tx.hash(),
                        name: name.clone(),
                        precision: *precision,
                        amount: *amount,
                        issued: Fixed8::ZERO,
                        owner: *owner,
                        block_index: block.index(),
                    },
                )?;
            }
            TransactionData::Issue {
                asset_id,
                to,
                value,
            } => {
                let key = StorageKey::asset(asset_id);
                let Some(mut asset) = snapshot.get::<AssetState>(&key)? else {
                    return Err(LedgerError::invalid_transaction(tx.hash(), "unknown asset"));
                };
                asset.issued = asset.issued + *value;
                snapshot.put(&key, &asset)?;
                Self::credit(snapshot, to, *asset_id, *value)?;
            }
            TransactionData::Contract {
                asset_id,
                to,
                value,
            } => {
                if Self::debit(snapshot, tx.account(), *asset_id, *value)? {
                    Self::credit(snapshot, to, *asset_id, *value)?;
                } else {
                    warn!(tx = %tx.hash(), "transfer skipped: insufficient balance");
                }
            }
            TransactionData::Invocation {
                script, gas_limit, ..
            } => {
                let fee = tx.network_fee();
                if !Self::debit(snapshot, tx.account(), self.chain.utility_token(), fee)? {
                    warn!(tx = %tx.hash(), %fee, "invocation skipped: cannot prepay fee");
                    return Ok(());
                }
                let mut scratch = snapshot.clone();
                let result: ExecutionResult =
                    self.chain
                        .executor()
                        .execute(script, tx, &mut scratch, *gas_limit);
                if !result.is_halt() {
                    debug!(tx = %tx.hash(), gas = %result.gas_consumed, "invocation faulted");
                    return Ok(());
                }
                *snapshot = scratch;
                notifications.extend(result.app_chain_notifications.iter().cloned());
                let settings = self.chain.settings();
                if !settings.is_root() && is_change_validators(tx) {
                    if let Some(validators) = validators_from_stack(&result.result_stack) {
                        notifications.push(AppChainNotification::ChangeValidators {
                            chain_hash: settings.chain_hash,
                            validators,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
