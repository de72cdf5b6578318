//! The signed envelope that carries consensus messages between validators.

use crate::crypto::{hash256, KeyPair, PublicKey};
use crate::script::{invocation_script, signature_contract_hash, signature_redeem_script};
use crate::{UInt256, Witness};
use appchain_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable};
use std::fmt;

const MAX_PAYLOAD_DATA: usize = 1024 * 1024;

/// `version(4) prev_hash(32) block_index(4) validator_index(2) timestamp(4)
/// data(var) witness`
#[derive(Clone, PartialEq, Eq)]
pub struct ConsensusPayload {
    version: u32,
    prev_hash: UInt256,
    block_index: u32,
    validator_index: u16,
    timestamp: u32,
    data: Vec<u8>,
    witness: Witness,
    hash: UInt256,
}

impl ConsensusPayload {
    pub fn new(
        version: u32,
        prev_hash: UInt256,
        block_index: u32,
        validator_index: u16,
        timestamp: u32,
        data: Vec<u8>,
    ) -> Self {
        Self::from_parts(
            version,
            prev_hash,
            block_index,
            validator_index,
            timestamp,
            data,
            Witness::default(),
        )
    }

    fn from_parts(
        version: u32,
        prev_hash: UInt256,
        block_index: u32,
        validator_index: u16,
        timestamp: u32,
        data: Vec<u8>,
        witness: Witness,
    ) -> Self {
        let mut payload = Self {
            version,
            prev_hash,
            block_index,
            validator_index,
            timestamp,
            data,
            witness,
            hash: UInt256::zero(),
        };
        payload.hash = hash256(&payload.get_hash_data());
        payload
    }

    #[must_use]
    pub fn sign(mut self, key: &KeyPair) -> Self {
        let signature = key.sign(&self.get_hash_data());
        self.witness = Witness::new(
            invocation_script(&[signature]),
            signature_redeem_script(key.public_key()),
        );
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

    pub fn block_index(&self) -> u32 {
        self.block_index
    }

    pub fn validator_index(&self) -> u16 {
        self.validator_index
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    pub fn get_hash_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_serializable(&self.prev_hash);
        writer.write_u32(self.block_index);
        writer.write_u16(self.validator_index);
        writer.write_u32(self.timestamp);
        writer.write_var_bytes(&self.data);
    }

    /// Checks the witness against the signing validator's key.
    pub fn verify_witness(&self, validator: &PublicKey) -> bool {
        self.witness
            .verify(&self.get_hash_data(), &signature_contract_hash(validator))
    }
}

impl fmt::Debug for ConsensusPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusPayload")
            .field("hash", &self.hash)
            .field("block_index", &self.block_index)
            .field("validator_index", &self.validator_index)
            .finish_non_exhaustive()
    }
}

impl Serializable for ConsensusPayload {
    fn size(&self) -> usize {
        4 + 32 + 4 + 2 + 4 + helper::get_var_bytes_size(self.data.len()) + self.witness.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_serializable(&self.witness);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let version = reader.read_u32()?;
        let prev_hash = reader.read_serializable()?;
        let block_index = reader.read_u32()?;
        let validator_index = reader.read_u16()?;
        let timestamp = reader.read_u32()?;
        let data = reader.read_var_bytes(MAX_PAYLOAD_DATA)?;
        let witness = reader.read_serializable()?;
        Ok(Self::from_parts(
            version,
            prev_hash,
            block_index,
            validator_index,
            timestamp,
            data,
            witness,
        ))
    }
}
