//! `headers` reply.

use crate::MAX_HEADERS_PER_MESSAGE;
use appchain_core::Header;
use appchain_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

impl HeadersPayload {
    pub fn new(headers: Vec<Header>) -> Self {
        Self { headers }
    }
}

impl Serializable for HeadersPayload {
    fn size(&self) -> usize {
        helper::get_array_size(&self.headers)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable_vec(&self.headers);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            headers: reader.read_serializable_vec(MAX_HEADERS_PER_MESSAGE)?,
        })
    }
}
