//! Deflate-compressed transaction batches.

use crate::{NetworkError, NetworkResult, MAX_COMPRESSED_TRANSACTIONS, MAX_PAYLOAD_SIZE};
use appchain_core::Transaction;
use appchain_io::{helper, BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Up to `MAX_COMPRESSED_TRANSACTIONS` transactions sent as one deflate
/// stream. The compressed bytes are produced once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedTransactionsPayload {
    transactions: Vec<Transaction>,
    compressed: Vec<u8>,
}

impl CompressedTransactionsPayload {
    pub fn new(transactions: Vec<Transaction>) -> NetworkResult<Self> {
        if transactions.len() > MAX_COMPRESSED_TRANSACTIONS {
            return Err(NetworkError::PayloadTooLarge {
                size: transactions.len(),
                max: MAX_COMPRESSED_TRANSACTIONS,
            });
        }
        let mut raw = BinaryWriter::with_capacity(helper::get_array_size(&transactions));
        raw.write_serializable_vec(&transactions);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw.into_bytes())?;
        let compressed = encoder.finish()?;
        Ok(Self {
            transactions,
            compressed,
        })
    }

    /// Splits `transactions` into batches of the maximum size.
    pub fn create_batches(transactions: &[Transaction]) -> NetworkResult<Vec<Self>> {
        transactions
            .chunks(MAX_COMPRESSED_TRANSACTIONS)
            .map(|chunk| Self::new(chunk.to_vec()))
            .collect()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    pub fn compressed_len(&self) -> usize {
        self.compressed.len()
    }
}

impl Serializable for CompressedTransactionsPayload {
    fn size(&self) -> usize {
        helper::get_var_bytes_size(self.compressed.len())
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.compressed);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let compressed = reader.read_var_bytes(MAX_PAYLOAD_SIZE)?;
        let mut raw = Vec::new();
        DeflateDecoder::new(compressed.as_slice())
            .take(MAX_PAYLOAD_SIZE as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| IoError::invalid_format(format!("bad deflate stream: {e}")))?;
        if raw.len() > MAX_PAYLOAD_SIZE {
            return Err(IoError::Overflow {
                value: raw.len() as u64,
                max: MAX_PAYLOAD_SIZE as u64,
            });
        }
        let mut inner = MemoryReader::new(&raw);
        let transactions = inner.read_serializable_vec(MAX_COMPRESSED_TRANSACTIONS)?;
        inner.ensure_end()?;
        Ok(Self {
            transactions,
            compressed,
        })
    }
}
