//! Transactions.
//!
//! A transaction is a common header (version, nonce, account, attributes,
//! witnesses) wrapped around type-specific data. The hash covers everything
//! except the witnesses and is computed once, when the value is built or
//! decoded.

use crate::crypto::{hash256, KeyPair};
use crate::script::{invocation_script, signature_redeem_script};
use crate::{Fixed8, UInt160, UInt256, Witness};
use appchain_io::{helper, BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use std::fmt;

pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;
pub const MAX_TRANSACTION_OUTPUTS: usize = 16;
pub const MAX_INVOCATION_SCRIPT_SIZE: usize = 65_536;
pub const MAX_ASSET_NAME_SIZE: usize = 255;
const MAX_ATTRIBUTE_DATA: usize = 252;
const MAX_WITNESSES: usize = 16;

/// Transaction type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionType {
    Miner = 0x00,
    Issue = 0x01,
    Register = 0x40,
    Contract = 0x80,
    Invocation = 0xD1,
}

impl TransactionType {
    #[must_use]
    pub const fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Miner),
            0x01 => Some(Self::Issue),
            0x40 => Some(Self::Register),
            0x80 => Some(Self::Contract),
            0xD1 => Some(Self::Invocation),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Miner => "MinerTransaction",
            Self::Issue => "IssueTransaction",
            Self::Register => "RegisterTransaction",
            Self::Contract => "ContractTransaction",
            Self::Invocation => "InvocationTransaction",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value credited to a script hash, used by miner transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutput {
    pub asset_id: UInt256,
    pub value: Fixed8,
    pub script_hash: UInt160,
}

impl Serializable for TransactionOutput {
    fn size(&self) -> usize {
        UInt256::LENGTH + 8 + UInt160::LENGTH
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.asset_id);
        writer.write_serializable(&self.value);
        writer.write_serializable(&self.script_hash);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            asset_id: reader.read_serializable()?,
            value: reader.read_serializable()?,
            script_hash: reader.read_serializable()?,
        })
    }
}

/// Free-form tagged data attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAttribute {
    pub usage: u8,
    pub data: Vec<u8>,
}

impl Serializable for TransactionAttribute {
    fn size(&self) -> usize {
        1 + helper::get_var_bytes_size(self.data.len())
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.usage);
        writer.write_var_bytes(&self.data);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            usage: reader.read_u8()?,
            data: reader.read_var_bytes(MAX_ATTRIBUTE_DATA)?,
        })
    }
}

/// Type-specific transaction content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionData {
    /// Block reward: pays the collected network fees to the proposer.
    Miner { outputs: Vec<TransactionOutput> },
    /// Mints `value` of an asset to `to`; only the asset owner may issue.
    Issue {
        asset_id: UInt256,
        to: UInt160,
        value: Fixed8,
    },
    /// Registers an asset. Deprecated: only accepted in the genesis block.
    Register {
        name: String,
        precision: u8,
        amount: Fixed8,
        owner: UInt160,
    },
    /// Transfers `value` of an asset from the transaction account to `to`.
    Contract {
        asset_id: UInt256,
        to: UInt160,
        value: Fixed8,
    },
    /// Runs a script with a prepaid gas budget.
    Invocation {
        script: Vec<u8>,
        gas_price: Fixed8,
        gas_limit: Fixed8,
    },
}

impl TransactionData {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Miner { .. } => TransactionType::Miner,
            Self::Issue { .. } => TransactionType::Issue,
            Self::Register { .. } => TransactionType::Register,
            Self::Contract { .. } => TransactionType::Contract,
            Self::Invocation { .. } => TransactionType::Invocation,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Miner { outputs } => helper::get_array_size(outputs),
            Self::Issue { .. } | Self::Contract { .. } => UInt256::LENGTH + UInt160::LENGTH + 8,
            Self::Register { name, .. } => {
                helper::get_var_bytes_size(name.len()) + 1 + 8 + UInt160::LENGTH
            }
            Self::Invocation { script, .. } => helper::get_var_bytes_size(script.len()) + 16,
        }
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        match self {
            Self::Miner { outputs } => writer.write_serializable_vec(outputs),
            Self::Issue {
                asset_id,
                to,
                value,
            }
            | Self::Contract {
                asset_id,
                to,
                value,
            } => {
                writer.write_serializable(asset_id);
                writer.write_serializable(to);
                writer.write_serializable(value);
            }
            Self::Register {
                name,
                precision,
                amount,
                owner,
            } => {
                writer.write_var_string(name);
                writer.write_u8(*precision);
                writer.write_serializable(amount);
                writer.write_serializable(owner);
            }
            Self::Invocation {
                script,
                gas_price,
                gas_limit,
            } => {
                writer.write_var_bytes(script);
                writer.write_serializable(gas_price);
                writer.write_serializable(gas_limit);
            }
        }
    }

    fn deserialize(tx_type: TransactionType, reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(match tx_type {
            TransactionType::Miner => Self::Miner {
                outputs: reader.read_serializable_vec(MAX_TRANSACTION_OUTPUTS)?,
            },
            TransactionType::Issue => Self::Issue {
                asset_id: reader.read_serializable()?,
                to: reader.read_serializable()?,
                value: reader.read_serializable()?,
            },
            TransactionType::Contract => Self::Contract {
                asset_id: reader.read_serializable()?,
                to: reader.read_serializable()?,
                value: reader.read_serializable()?,
            },
            TransactionType::Register => Self::Register {
                name: reader.read_var_string(MAX_ASSET_NAME_SIZE)?,
                precision: reader.read_u8()?,
                amount: reader.read_serializable()?,
                owner: reader.read_serializable()?,
            },
            TransactionType::Invocation => {
                let script = reader.read_var_bytes(MAX_INVOCATION_SCRIPT_SIZE)?;
                if script.is_empty() {
                    return Err(IoError::invalid_format("empty invocation script"));
                }
                Self::Invocation {
                    script,
                    gas_price: reader.read_serializable()?,
                    gas_limit: reader.read_serializable()?,
                }
            }
        })
    }
}

/// An immutable transaction with its hash computed at construction.
#[derive(Clone)]
pub struct Transaction {
    version: u8,
    nonce: u32,
    account: UInt160,
    data: TransactionData,
    attributes: Vec<TransactionAttribute>,
    witnesses: Vec<Witness>,
    hash: UInt256,
}

impl Transaction {
    pub fn new(
        nonce: u32,
        account: UInt160,
        data: TransactionData,
        attributes: Vec<TransactionAttribute>,
    ) -> Self {
        Self::from_parts(0, nonce, account, data, attributes, Vec::new())
    }

    fn from_parts(
        version: u8,
        nonce: u32,
        account: UInt160,
        data: TransactionData,
        attributes: Vec<TransactionAttribute>,
        witnesses: Vec<Witness>,
    ) -> Self {
        let mut tx = Self {
            version,
            nonce,
            account,
            data,
            attributes,
            witnesses,
            hash: UInt256::zero(),
        };
        tx.hash = hash256(&tx.get_hash_data());
        tx
    }

    /// Builds a miner transaction paying `outputs`.
    pub fn miner(nonce: u32, outputs: Vec<TransactionOutput>) -> Self {
        Self::new(nonce, UInt160::zero(), TransactionData::Miner { outputs }, Vec::new())
    }

    /// Returns the same transaction with its witnesses replaced.
    #[must_use]
    pub fn with_witnesses(mut self, witnesses: Vec<Witness>) -> Self {
        self.witnesses = witnesses;
        self
    }

    /// Signs with a single-signature witness for `key`.
    #[must_use]
    pub fn sign(self, key: &KeyPair) -> Self {
        let signature = key.sign(&self.get_hash_data());
        let witness = Witness::new(
            invocation_script(&[signature]),
            signature_redeem_script(key.public_key()),
        );
        self.with_witnesses(vec![witness])
    }

    pub fn hash(&self) -> UInt256 {
        self.hash
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn account(&self) -> &UInt160 {
        &self.account
    }

    pub fn data(&self) -> &TransactionData {
        &self.data
    }

    pub fn attributes(&self) -> &[TransactionAttribute] {
        &self.attributes
    }

    pub fn witnesses(&self) -> &[Witness] {
        &self.witnesses
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.data.transaction_type()
    }

    pub fn is_miner(&self) -> bool {
        matches!(self.data, TransactionData::Miner { .. })
    }

    /// Network fee credited to the block proposer.
    pub fn network_fee(&self) -> Fixed8 {
        match &self.data {
            TransactionData::Invocation {
                gas_price,
                gas_limit,
                ..
            } => gas_price.checked_mul(*gas_limit).unwrap_or(Fixed8::MAX),
            _ => Fixed8::ZERO,
        }
    }

    /// Accounts whose witnesses must authorise this transaction.
    pub fn script_hashes_for_verifying(&self) -> Vec<UInt160> {
        match self.data {
            TransactionData::Miner { .. } => Vec::new(),
            _ => vec![self.account],
        }
    }

    /// Checks every witness against the unsigned data.
    pub fn verify_witnesses(&self) -> bool {
        let hashes = self.script_hashes_for_verifying();
        if hashes.len() != self.witnesses.len() {
            return false;
        }
        let message = self.get_hash_data();
        hashes
            .iter()
            .zip(&self.witnesses)
            .all(|(hash, witness)| witness.verify(&message, hash))
    }

    /// Serialized form without witnesses; the signed message.
    pub fn get_hash_data(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.unsigned_size());
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    fn unsigned_size(&self) -> usize {
        1 + 1 + 4 + UInt160::LENGTH + self.data.size() + helper::get_array_size(&self.attributes)
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.transaction_type() as u8);
        writer.write_u8(self.version);
        writer.write_u32(self.nonce);
        writer.write_serializable(&self.account);
        self.data.serialize(writer);
        writer.write_serializable_vec(&self.attributes);
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.witnesses == other.witnesses
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("type", &self.transaction_type())
            .field("hash", &self.hash)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl Serializable for Transaction {
    fn size(&self) -> usize {
        self.unsigned_size() + helper::get_array_size(&self.witnesses)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_serializable_vec(&self.witnesses);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let tag = reader.read_u8()?;
        let tx_type = TransactionType::from_byte(tag)
            .ok_or_else(|| IoError::invalid_format(format!("unknown transaction type {tag:#04x}")))?;
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(IoError::invalid_format(format!(
                "unsupported transaction version {version}"
            )));
        }
        let nonce = reader.read_u32()?;
        let account = reader.read_serializable()?;
        let data = TransactionData::deserialize(tx_type, reader)?;
        let attributes = reader.read_serializable_vec(MAX_TRANSACTION_ATTRIBUTES)?;
        let witnesses = reader.read_serializable_vec(MAX_WITNESSES)?;
        Ok(Self::from_parts(
            version, nonce, account, data, attributes, witnesses,
        ))
    }
}
