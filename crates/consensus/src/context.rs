//! Per-height round state.
//!
//! A context is created once per service. [`ConsensusContext::reset`] starts
//! a new height from the chain tip; [`ConsensusContext::change_view`] moves
//! to a later view of the same height and keeps signatures this node has
//! already given.

use crate::messages::{ConsensusMessage, PrepareRequest, PrepareResponse};
use crate::{ConsensusError, ConsensusResult, CONSENSUS_VERSION};
use appchain_core::script::{bft_quorum, consensus_address, invocation_script, multi_sig_redeem_script};
use appchain_core::{
    merkle, Block, ConsensusPayload, Fixed8, Header, KeyPair, PublicKey, Transaction,
    TransactionData, TransactionOutput, UInt160, UInt256, Witness, SIGNATURE_SIZE,
};
use appchain_ledger::{Chain, Snapshot};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Signatures needed to finalize a block among `n` validators.
pub fn quorum(n: usize) -> usize {
    bft_quorum(n)
}

/// Index of the primary for `block_index` at `view`.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn primary_index(block_index: u32, view: u16, n: usize) -> usize {
    assert!(n > 0, "empty validator set");
    let n = n as i64;
    let p = (i64::from(block_index) - i64::from(view)) % n;
    ((p + n) % n) as usize
}

/// What this node does in the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Not a validator, or the round has not started.
    #[default]
    Idle,
    Primary {
        request_sent: bool,
    },
    Backup {
        request_received: bool,
    },
}

impl Role {
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary { .. })
    }

    pub fn is_backup(&self) -> bool {
        matches!(self, Self::Backup { .. })
    }

    pub fn request_sent(&self) -> bool {
        matches!(self, Self::Primary { request_sent: true })
    }

    pub fn request_received(&self) -> bool {
        matches!(self, Self::Backup { request_received: true })
    }
}

/// Flags that hold regardless of role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundFlags {
    /// This node signed the proposed header.
    pub signature_sent: bool,
    /// This node asked for a later view.
    pub view_changing: bool,
    /// The block for this height was assembled and relayed.
    pub block_sent: bool,
}

pub struct ConsensusContext {
    key: KeyPair,
    pub role: Role,
    pub flags: RoundFlags,
    pub prev_hash: UInt256,
    /// Timestamp of the block at `prev_hash`.
    pub prev_timestamp: u32,
    pub block_index: u32,
    pub view_number: u16,
    pub validators: Vec<PublicKey>,
    pub my_index: Option<usize>,
    pub primary_index: usize,
    pub timestamp: u32,
    pub nonce: u64,
    pub next_consensus: UInt160,
    /// Proposed block content; empty until a proposal is made or received.
    pub transaction_hashes: Vec<UInt256>,
    pub transactions: HashMap<UInt256, Transaction>,
    pub signatures: Vec<Option<[u8; SIGNATURE_SIZE]>>,
    pub expected_view: Vec<u16>,
    pub snapshot: Option<Snapshot>,
}

impl ConsensusContext {
    pub fn new(key: KeyPair) -> Self {
        Self {
            key,
            role: Role::Idle,
            flags: RoundFlags::default(),
            prev_hash: UInt256::zero(),
            prev_timestamp: 0,
            block_index: 0,
            view_number: 0,
            validators: Vec::new(),
            my_index: None,
            primary_index: 0,
            timestamp: 0,
            nonce: 0,
            next_consensus: UInt160::zero(),
            transaction_hashes: Vec::new(),
            transactions: HashMap::new(),
            signatures: Vec::new(),
            expected_view: Vec::new(),
            snapshot: None,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    /// Quorum for the current validator set.
    pub fn m(&self) -> usize {
        quorum(self.validators.len())
    }

    pub fn is_primary(&self) -> bool {
        self.my_index == Some(self.primary_index)
    }

    /// Starts height `tip + 1` from the chain's current state.
    pub fn reset(&mut self, chain: &Chain) -> ConsensusResult<()> {
        let prev_hash = chain
            .current_block_hash()
            .ok_or(ConsensusError::ChainNotInitialized)?;
        let prev_header = chain
            .get_header(&prev_hash)?
            .ok_or(ConsensusError::ChainNotInitialized)?;
        let validators = chain.validators()?;
        if validators.is_empty() {
            return Err(ConsensusError::InvalidState("no validators"));
        }
        let n = validators.len();

        self.role = Role::Idle;
        self.flags = RoundFlags::default();
        self.prev_hash = prev_hash;
        self.prev_timestamp = prev_header.timestamp();
        self.block_index = prev_header.index() + 1;
        self.view_number = 0;
        self.my_index = validators
            .iter()
            .position(|validator| validator == self.key.public_key());
        self.primary_index = primary_index(self.block_index, 0, n);
        self.validators = validators;
        self.timestamp = 0;
        self.nonce = 0;
        self.next_consensus = UInt160::zero();
        self.transaction_hashes.clear();
        self.transactions.clear();
        self.signatures = vec![None; n];
        self.expected_view = vec![0; n];
        self.snapshot = Some(chain.snapshot());
        Ok(())
    }

    /// Moves to `view_number` within the same height.
    ///
    /// Only `signature_sent` survives. Without it the proposal and every
    /// collected signature are dropped.
    pub fn change_view(&mut self, view_number: u16) {
        self.role = Role::Idle;
        self.flags = RoundFlags {
            signature_sent: self.flags.signature_sent,
            ..RoundFlags::default()
        };
        self.view_number = view_number;
        self.primary_index = primary_index(self.block_index, view_number, self.validators.len());
        if !self.flags.signature_sent {
            self.transaction_hashes.clear();
            self.transactions.clear();
            self.signatures = vec![None; self.validators.len()];
        }
        if let Some(index) = self.my_index {
            self.expected_view[index] = view_number;
        }
    }

    /// The unsigned header of the proposal, if one is known.
    pub fn make_header(&self) -> Option<Header> {
        if self.transaction_hashes.is_empty() {
            return None;
        }
        Some(self.header_for(
            &self.transaction_hashes,
            self.timestamp,
            self.nonce,
            self.next_consensus,
        ))
    }

    /// The unsigned header a proposal with these fields would produce.
    pub fn header_for(
        &self,
        transaction_hashes: &[UInt256],
        timestamp: u32,
        nonce: u64,
        next_consensus: UInt160,
    ) -> Header {
        Header::new(
            0,
            self.prev_hash,
            merkle::compute_root(transaction_hashes),
            timestamp,
            self.block_index,
            nonce,
            next_consensus,
            Witness::default(),
        )
    }

    /// Stores this node's signature over the proposed header.
    pub fn sign_header(&mut self) -> Option<[u8; SIGNATURE_SIZE]> {
        let index = self.my_index?;
        let header = self.make_header()?;
        let signature = self.key.sign(&header.get_hash_data());
        self.signatures[index] = Some(signature);
        Some(signature)
    }

    pub fn my_signature(&self) -> Option<[u8; SIGNATURE_SIZE]> {
        self.signatures.get(self.my_index?).copied().flatten()
    }

    /// Wraps `message` in a payload signed by this node.
    pub fn make_payload(&self, message: &ConsensusMessage) -> ConsensusResult<ConsensusPayload> {
        let index = self.my_index.ok_or(ConsensusError::NotValidator)?;
        let payload = ConsensusPayload::new(
            CONSENSUS_VERSION,
            self.prev_hash,
            self.block_index,
            index as u16,
            self.timestamp,
            message.to_bytes(),
        );
        Ok(payload.sign(&self.key))
    }

    pub fn make_change_view(&self) -> ConsensusResult<ConsensusPayload> {
        let index = self.my_index.ok_or(ConsensusError::NotValidator)?;
        let message = ConsensusMessage::change_view(self.view_number, self.expected_view[index])?;
        self.make_payload(&message)
    }

    pub fn make_prepare_request(&self) -> ConsensusResult<ConsensusPayload> {
        let signature = self
            .my_signature()
            .ok_or(ConsensusError::InvalidState("proposal not signed"))?;
        let miner_transaction = self
            .transaction_hashes
            .first()
            .and_then(|hash| self.transactions.get(hash))
            .cloned()
            .ok_or(ConsensusError::InvalidState("proposal without miner transaction"))?;
        let request = PrepareRequest {
            nonce: self.nonce,
            next_consensus: self.next_consensus,
            transaction_hashes: self.transaction_hashes.clone(),
            miner_transaction,
            signature,
        };
        self.make_payload(&ConsensusMessage::prepare_request(self.view_number, request))
    }

    pub fn make_prepare_response(&self, signature: [u8; SIGNATURE_SIZE]) -> ConsensusResult<ConsensusPayload> {
        self.make_payload(&ConsensusMessage::prepare_response(
            self.view_number,
            PrepareResponse::new(signature),
        ))
    }

    /// Fills the proposal from the memory pool.
    ///
    /// The pool's verified transactions, highest fee first, pass through the
    /// policy filter. A miner transaction paying the network fee to this node
    /// is put in front, with a nonce not already used on chain.
    pub fn fill(&mut self, chain: &Chain) -> ConsensusResult<()> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or(ConsensusError::ChainNotInitialized)?;
        let mut transactions = chain
            .policy()
            .filter_for_block(chain.mempool().get_sorted_verified_transactions());
        transactions.truncate(chain.settings().max_transactions_per_block.saturating_sub(1));

        let network_fee: Fixed8 = transactions.iter().map(Transaction::network_fee).sum();
        let outputs = if network_fee > Fixed8::ZERO {
            vec![TransactionOutput {
                asset_id: chain.utility_token(),
                value: network_fee,
                script_hash: self.key.script_hash(),
            }]
        } else {
            Vec::new()
        };
        let (nonce, miner) = loop {
            let nonce: u64 = rand::random();
            let miner = Transaction::miner(nonce as u32, outputs.clone());
            if !snapshot.contains_transaction(&miner.hash()) {
                break (nonce, miner);
            }
        };
        transactions.insert(0, miner);

        let validators = chain.get_validators(&transactions)?;
        self.nonce = nonce;
        self.next_consensus = consensus_address(&validators);
        self.timestamp = now_timestamp().max(self.prev_timestamp + 1);
        self.transaction_hashes = transactions.iter().map(Transaction::hash).collect();
        self.transactions = transactions
            .into_iter()
            .map(|tx| (tx.hash(), tx))
            .collect();
        self.signatures = vec![None; self.validators.len()];
        debug!(
            block_index = self.block_index,
            transactions = self.transaction_hashes.len(),
            "proposal filled"
        );
        Ok(())
    }

    /// Checks a complete received proposal: the agreed next consensus
    /// address and a miner transaction paying exactly the network fee.
    pub fn verify_request(&self, chain: &Chain) -> ConsensusResult<bool> {
        if !self.role.request_received() {
            return Ok(false);
        }
        let transactions: Vec<Transaction> = self.transactions.values().cloned().collect();
        let validators = chain.get_validators(&transactions)?;
        if consensus_address(&validators) != self.next_consensus {
            debug!(block_index = self.block_index, "next consensus mismatch");
            return Ok(false);
        }
        let network_fee: Fixed8 = transactions.iter().map(Transaction::network_fee).sum();
        let paid: Fixed8 = transactions
            .iter()
            .filter_map(|tx| match tx.data() {
                TransactionData::Miner { outputs } => {
                    Some(outputs.iter().map(|output| output.value).sum::<Fixed8>())
                }
                _ => None,
            })
            .sum();
        Ok(paid == network_fee)
    }

    /// Whether every proposed transaction is present.
    pub fn has_all_transactions(&self) -> bool {
        !self.transaction_hashes.is_empty()
            && self
                .transaction_hashes
                .iter()
                .all(|hash| self.transactions.contains_key(hash))
    }

    /// Assembles the block once `M` signatures and all transactions are in.
    ///
    /// The witness carries the first `M` signatures in validator order.
    pub fn create_block(&self) -> Option<Block> {
        let m = self.m();
        if self.signatures.iter().flatten().count() < m || !self.has_all_transactions() {
            return None;
        }
        let header = self.make_header()?;
        let signatures: Vec<[u8; SIGNATURE_SIZE]> =
            self.signatures.iter().flatten().take(m).copied().collect();
        let header = header.with_witness(Witness::new(
            invocation_script(&signatures),
            multi_sig_redeem_script(m, &self.validators),
        ));
        let transactions = self
            .transaction_hashes
            .iter()
            .filter_map(|hash| self.transactions.get(hash).cloned())
            .collect();
        Some(Block::new(header, transactions))
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}
