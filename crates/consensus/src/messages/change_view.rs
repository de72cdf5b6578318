use crate::{ConsensusError, ConsensusResult};
use appchain_io::{BinaryWriter, MemoryReader};

/// Request to move the round to `new_view_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeView {
    new_view_number: u16,
}

impl ChangeView {
    /// Fails if `new_view_number` is zero: no round changes back to view 0.
    pub fn new(new_view_number: u16) -> ConsensusResult<Self> {
        if new_view_number == 0 {
            return Err(ConsensusError::invalid_format("new view number is zero"));
        }
        Ok(Self { new_view_number })
    }

    pub fn new_view_number(&self) -> u16 {
        self.new_view_number
    }

    pub(crate) fn write_body(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.new_view_number);
    }

    pub(crate) fn read_body(reader: &mut MemoryReader) -> ConsensusResult<Self> {
        Self::new(reader.read_u16()?)
    }
}
