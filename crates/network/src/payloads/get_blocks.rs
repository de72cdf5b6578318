//! `getblocks` / `getheaders` request.

use appchain_core::UInt256;
use appchain_io::{BinaryWriter, IoResult, MemoryReader, Serializable};

/// Requests what follows `hash_start`, up to `hash_stop` (zero = no stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlocksPayload {
    pub hash_start: UInt256,
    pub hash_stop: UInt256,
}

impl GetBlocksPayload {
    pub fn new(hash_start: UInt256) -> Self {
        Self {
            hash_start,
            hash_stop: UInt256::zero(),
        }
    }
}

impl Serializable for GetBlocksPayload {
    fn size(&self) -> usize {
        UInt256::LENGTH * 2
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.hash_start);
        writer.write_serializable(&self.hash_stop);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            hash_start: reader.read_serializable()?,
            hash_stop: reader.read_serializable()?,
        })
    }
}
