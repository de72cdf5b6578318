use crate::{ConsensusError, ConsensusResult};
use appchain_core::{Transaction, UInt160, UInt256, SIGNATURE_SIZE};
use appchain_io::{BinaryWriter, MemoryReader};
use std::collections::HashSet;

/// Most transactions one proposal may reference.
const MAX_TRANSACTION_HASHES: usize = u16::MAX as usize;

/// The primary's block proposal.
///
/// `transaction_hashes[0]` is always the hash of `miner_transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    pub nonce: u64,
    pub next_consensus: UInt160,
    pub transaction_hashes: Vec<UInt256>,
    pub miner_transaction: Transaction,
    /// Primary's signature over the proposed header.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl PrepareRequest {
    pub(crate) fn write_body(&self, writer: &mut BinaryWriter) {
        writer.write_u64(self.nonce);
        writer.write_serializable(&self.next_consensus);
        writer.write_serializable_vec(&self.transaction_hashes);
        writer.write_serializable(&self.miner_transaction);
        writer.write_bytes(&self.signature);
    }

    pub(crate) fn read_body(reader: &mut MemoryReader) -> ConsensusResult<Self> {
        let nonce = reader.read_u64()?;
        let next_consensus = reader.read_serializable()?;
        let transaction_hashes: Vec<UInt256> =
            reader.read_serializable_vec(MAX_TRANSACTION_HASHES)?;
        if transaction_hashes.is_empty() {
            return Err(ConsensusError::invalid_format("proposal without transactions"));
        }
        let unique: HashSet<&UInt256> = transaction_hashes.iter().collect();
        if unique.len() != transaction_hashes.len() {
            return Err(ConsensusError::invalid_format("duplicate transaction hash"));
        }
        let miner_transaction: Transaction = reader.read_serializable()?;
        if !miner_transaction.is_miner() {
            return Err(ConsensusError::invalid_format("first transaction is not a miner transaction"));
        }
        if miner_transaction.hash() != transaction_hashes[0] {
            return Err(ConsensusError::invalid_format("miner transaction hash mismatch"));
        }
        let signature = reader.read_fixed::<SIGNATURE_SIZE>()?;
        Ok(Self {
            nonce,
            next_consensus,
            transaction_hashes,
            miner_transaction,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsensusMessage;
    use appchain_core::hash256;

    fn request(hashes: Vec<UInt256>, miner: Transaction) -> ConsensusMessage {
        ConsensusMessage::prepare_request(
            1,
            PrepareRequest {
                nonce: 42,
                next_consensus: UInt160::zero(),
                transaction_hashes: hashes,
                miner_transaction: miner,
                signature: [3u8; SIGNATURE_SIZE],
            },
        )
    }

    #[test]
    fn test_prepare_request_round_trip() {
        let miner = Transaction::miner(9, Vec::new());
        let message = request(vec![miner.hash(), hash256(b"tx")], miner);
        assert_eq!(
            ConsensusMessage::from_bytes(&message.to_bytes()).unwrap(),
            message
        );
    }

    #[test]
    fn test_prepare_request_rejects_bad_hash_lists() {
        let miner = Transaction::miner(9, Vec::new());
        let wrong_first = request(vec![hash256(b"tx"), miner.hash()], miner.clone());
        assert!(ConsensusMessage::from_bytes(&wrong_first.to_bytes()).is_err());

        let duplicated = request(vec![miner.hash(), miner.hash()], miner);
        assert!(ConsensusMessage::from_bytes(&duplicated.to_bytes()).is_err());
    }
}
