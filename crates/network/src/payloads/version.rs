//! Handshake and keep-alive payloads.

use crate::PROTOCOL_VERSION;
use appchain_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable};
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_USER_AGENT: usize = 1024;

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: u32,
    pub timestamp: u32,
    /// Random per-process value; a peer echoing ours is ourselves.
    pub nonce: u32,
    pub user_agent: String,
    pub start_height: u32,
    /// Whether the sender wants inventory announcements.
    pub relay: bool,
}

impl VersionPayload {
    pub fn new(nonce: u32, user_agent: impl Into<String>, start_height: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            timestamp: unix_now(),
            nonce,
            user_agent: user_agent.into(),
            start_height,
            relay: true,
        }
    }
}

impl Serializable for VersionPayload {
    fn size(&self) -> usize {
        4 + 4 + 4 + helper::get_var_bytes_size(self.user_agent.len()) + 4 + 1
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.nonce);
        writer.write_var_string(&self.user_agent);
        writer.write_u32(self.start_height);
        writer.write_bool(self.relay);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            version: reader.read_u32()?,
            timestamp: reader.read_u32()?,
            nonce: reader.read_u32()?,
            user_agent: reader.read_var_string(MAX_USER_AGENT)?,
            start_height: reader.read_u32()?,
            relay: reader.read_bool()?,
        })
    }
}

/// `ping` / `pong`: carries the sender's height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    pub last_block_index: u32,
    pub timestamp: u32,
    pub nonce: u32,
}

impl PingPayload {
    pub fn new(last_block_index: u32, nonce: u32) -> Self {
        Self {
            last_block_index,
            timestamp: unix_now(),
            nonce,
        }
    }
}

impl Serializable for PingPayload {
    fn size(&self) -> usize {
        12
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.last_block_index);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.nonce);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            last_block_index: reader.read_u32()?,
            timestamp: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }
}
