use crate::ConsensusResult;
use appchain_core::SIGNATURE_SIZE;
use appchain_io::{BinaryWriter, MemoryReader};

/// A backup's signature over the proposed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareResponse {
    pub signature: [u8; SIGNATURE_SIZE],
}

impl PrepareResponse {
    pub fn new(signature: [u8; SIGNATURE_SIZE]) -> Self {
        Self { signature }
    }

    pub(crate) fn write_body(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.signature);
    }

    pub(crate) fn read_body(reader: &mut MemoryReader) -> ConsensusResult<Self> {
        Ok(Self {
            signature: reader.read_fixed::<SIGNATURE_SIZE>()?,
        })
    }
}
