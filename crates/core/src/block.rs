//! Block headers, blocks and trimmed blocks.

use crate::crypto::hash256;
use crate::merkle;
use crate::{Transaction, UInt160, UInt256, Witness};
use appchain_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable};
use std::collections::HashSet;
use std::fmt;

pub const MAX_TRANSACTIONS_PER_BLOCK: usize = u16::MAX as usize;
const UNSIGNED_HEADER_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 8 + 20;

/// A block header. The hash covers the unsigned fields only, so attaching
/// the witness after signing keeps it stable.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    version: u32,
    prev_hash: UInt256,
    merkle_root: UInt256,
    timestamp: u32,
    index: u32,
    consensus_data: u64,
    next_consensus: UInt160,
    witness: Witness,
    hash: UInt256,
}

impl Header {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: u32,
        prev_hash: UInt256,
        merkle_root: UInt256,
        timestamp: u32,
        index: u32,
        consensus_data: u64,
        next_consensus: UInt160,
        witness: Witness,
    ) -> Self {
        let mut header = Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            index,
            consensus_data,
            next_consensus,
            witness,
            hash: UInt256::zero(),
        };
        header.hash = hash256(&header.get_hash_data());
        header
    }

    #[must_use]
    pub fn with_witness(mut self, witness: Witness) -> Self {
        self.witness = witness;
        self
    }

    pub fn hash(&self) -> UInt256 {
        self.hash
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn prev_hash(&self) -> UInt256 {
        self.prev_hash
    }

    pub fn merkle_root(&self) -> UInt256 {
        self.merkle_root
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn consensus_data(&self) -> u64 {
        self.consensus_data
    }

    pub fn next_consensus(&self) -> UInt160 {
        self.next_consensus
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    /// The signed message: the serialized unsigned fields.
    pub fn get_hash_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(UNSIGNED_HEADER_SIZE);
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_serializable(&self.prev_hash);
        writer.write_serializable(&self.merkle_root);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.index);
        writer.write_u64(self.consensus_data);
        writer.write_serializable(&self.next_consensus);
    }

    /// Checks the witness against the previous header's `next_consensus`.
    pub fn verify_witness(&self, prev_next_consensus: &UInt160) -> bool {
        self.witness
            .verify(&self.get_hash_data(), prev_next_consensus)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("index", &self.index)
            .field("hash", &self.hash)
            .field("prev_hash", &self.prev_hash)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl Serializable for Header {
    fn size(&self) -> usize {
        UNSIGNED_HEADER_SIZE + self.witness.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_serializable(&self.witness);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let version = reader.read_u32()?;
        let prev_hash = reader.read_serializable()?;
        let merkle_root = reader.read_serializable()?;
        let timestamp = reader.read_u32()?;
        let index = reader.read_u32()?;
        let consensus_data = reader.read_u64()?;
        let next_consensus = reader.read_serializable()?;
        let witness = reader.read_serializable()?;
        Ok(Self::new(
            version,
            prev_hash,
            merkle_root,
            timestamp,
            index,
            consensus_data,
            next_consensus,
            witness,
        ))
    }
}

/// A header with its full transaction list.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn into_parts(self) -> (Header, Vec<Transaction>) {
        (self.header, self.transactions)
    }

    pub fn transaction_hashes(&self) -> Vec<UInt256> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            header: self.header.clone(),
            hashes: self.transaction_hashes(),
        }
    }

    /// Structural checks independent of ledger state: the first transaction
    /// is the only miner transaction, hashes are unique and the merkle root
    /// matches.
    pub fn verify_structure(&self) -> bool {
        let Some(first) = self.transactions.first() else {
            return false;
        };
        if !first.is_miner() || self.transactions[1..].iter().any(Transaction::is_miner) {
            return false;
        }
        let hashes = self.transaction_hashes();
        let unique: HashSet<&UInt256> = hashes.iter().collect();
        if unique.len() != hashes.len() {
            return false;
        }
        merkle::compute_root(&hashes) == self.header.merkle_root()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index())
            .field("hash", &self.hash())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Serializable for Block {
    fn size(&self) -> usize {
        self.header.size() + helper::get_array_size(&self.transactions)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.header);
        writer.write_serializable_vec(&self.transactions);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let header = reader.read_serializable()?;
        let transactions = reader.read_serializable_vec(MAX_TRANSACTIONS_PER_BLOCK)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

/// A header plus transaction hashes. With no hashes it records a header that
/// is known but whose block has not been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedBlock {
    pub header: Header,
    pub hashes: Vec<UInt256>,
}

impl TrimmedBlock {
    pub fn header_only(header: Header) -> Self {
        Self {
            header,
            hashes: Vec::new(),
        }
    }

    pub fn is_block(&self) -> bool {
        !self.hashes.is_empty()
    }
}

impl Serializable for TrimmedBlock {
    fn size(&self) -> usize {
        self.header.size() + helper::get_array_size(&self.hashes)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.header);
        writer.write_serializable_vec(&self.hashes);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            header: reader.read_serializable()?,
            hashes: reader.read_serializable_vec(MAX_TRANSACTIONS_PER_BLOCK)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionData;
    use crate::Fixed8;
    use appchain_io::SerializableExt;

    fn contract_tx(nonce: u32) -> Transaction {
        Transaction::new(
            nonce,
            UInt160::from_array([9u8; 20]),
            TransactionData::Contract {
                asset_id: UInt256::zero(),
                to: UInt160::zero(),
                value: Fixed8::ONE,
            },
            Vec::new(),
        )
    }

    fn block_with(transactions: Vec<Transaction>) -> Block {
        let hashes: Vec<UInt256> = transactions.iter().map(Transaction::hash).collect();
        let header = Header::new(
            0,
            UInt256::zero(),
            merkle::compute_root(&hashes),
            1_000,
            1,
            42,
            UInt160::zero(),
            Witness::default(),
        );
        Block::new(header, transactions)
    }

    #[test]
    fn test_header_hash_ignores_witness() {
        let block = block_with(vec![Transaction::miner(1, Vec::new())]);
        let header = block.header().clone();
        let signed = header
            .clone()
            .with_witness(Witness::new(vec![1, 2, 3], vec![4, 5]));
        assert_eq!(header.hash(), signed.hash());
        assert_ne!(header, signed);
    }

    #[test]
    fn test_verify_structure() {
        assert!(block_with(vec![Transaction::miner(1, Vec::new()), contract_tx(1)]).verify_structure());
        assert!(!block_with(vec![contract_tx(1)]).verify_structure());
        assert!(!block_with(vec![]).verify_structure());
        assert!(!block_with(vec![
            Transaction::miner(1, Vec::new()),
            Transaction::miner(2, Vec::new())
        ])
        .verify_structure());
        assert!(!block_with(vec![
            Transaction::miner(1, Vec::new()),
            contract_tx(1),
            contract_tx(1)
        ])
        .verify_structure());

        let good = block_with(vec![Transaction::miner(1, Vec::new()), contract_tx(2)]);
        let (header, mut txs) = good.into_parts();
        txs.push(contract_tx(3));
        assert!(!Block::new(header, txs).verify_structure());
    }

    #[test]
    fn test_block_encoding_preserves_hash() {
        let block = block_with(vec![Transaction::miner(7, Vec::new()), contract_tx(8)]);
        let decoded = Block::from_array(&block.to_array()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.transactions().len(), 2);

        let trimmed = block.trim();
        assert!(trimmed.is_block());
        let decoded = TrimmedBlock::from_array(&trimmed.to_array()).unwrap();
        assert_eq!(decoded.hashes, block.transaction_hashes());
        assert!(!TrimmedBlock::header_only(block.header().clone()).is_block());
    }
}
