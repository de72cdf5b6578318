//! Protocol messages.
//!
//! A closed set of commands; each decodes from the payload bytes of one
//! frame. Decoding failures are protocol violations.

use crate::payloads::{
    CompressedTransactionsPayload, GetBlocksPayload, HeadersPayload, InvGroupPayload, InvPayload,
    PingPayload, VersionPayload,
};
use crate::{NetworkError, NetworkResult};
use appchain_core::{Block, ConsensusPayload, Inventory, InventoryType, Transaction, UInt256};
use appchain_io::{IoError, SerializableExt};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    GetAddr,
    Ping(PingPayload),
    Pong(PingPayload),
    Inv(InvPayload),
    InvGroup(InvGroupPayload),
    GetData(InvPayload),
    GetDataGroup(InvGroupPayload),
    GetHeaders(GetBlocksPayload),
    Headers(HeadersPayload),
    GetBlocks(GetBlocksPayload),
    Block(Block),
    Transaction(Transaction),
    Transactions(CompressedTransactionsPayload),
    Consensus(ConsensusPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Verack => "verack",
            Self::GetAddr => "getaddr",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Inv(_) => "inv",
            Self::InvGroup(_) => "invgroup",
            Self::GetData(_) => "getdata",
            Self::GetDataGroup(_) => "getdatagroup",
            Self::GetHeaders(_) => "getheaders",
            Self::Headers(_) => "headers",
            Self::GetBlocks(_) => "getblocks",
            Self::Block(_) => "block",
            Self::Transaction(_) => "tx",
            Self::Transactions(_) => "txs",
            Self::Consensus(_) => "consensus",
        }
    }

    /// Payload bytes of the frame.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Version(payload) => payload.to_array(),
            Self::Verack | Self::GetAddr => Vec::new(),
            Self::Ping(payload) | Self::Pong(payload) => payload.to_array(),
            Self::Inv(payload) | Self::GetData(payload) => payload.to_array(),
            Self::InvGroup(payload) | Self::GetDataGroup(payload) => payload.to_array(),
            Self::GetHeaders(payload) | Self::GetBlocks(payload) => payload.to_array(),
            Self::Headers(payload) => payload.to_array(),
            Self::Block(block) => block.to_array(),
            Self::Transaction(tx) => tx.to_array(),
            Self::Transactions(payload) => payload.to_array(),
            Self::Consensus(payload) => payload.to_array(),
        }
    }

    pub fn decode(command: &str, payload: &[u8]) -> NetworkResult<Self> {
        let message = match command {
            "version" => Self::Version(VersionPayload::from_array(payload)?),
            "verack" => Self::empty(Self::Verack, payload)?,
            "getaddr" => Self::empty(Self::GetAddr, payload)?,
            "ping" => Self::Ping(PingPayload::from_array(payload)?),
            "pong" => Self::Pong(PingPayload::from_array(payload)?),
            "inv" => Self::Inv(InvPayload::from_array(payload)?),
            "invgroup" => Self::InvGroup(InvGroupPayload::from_array(payload)?),
            "getdata" => Self::GetData(InvPayload::from_array(payload)?),
            "getdatagroup" => Self::GetDataGroup(InvGroupPayload::from_array(payload)?),
            "getheaders" => Self::GetHeaders(GetBlocksPayload::from_array(payload)?),
            "headers" => Self::Headers(HeadersPayload::from_array(payload)?),
            "getblocks" => Self::GetBlocks(GetBlocksPayload::from_array(payload)?),
            "block" => Self::Block(Block::from_array(payload)?),
            "tx" => Self::Transaction(Transaction::from_array(payload)?),
            "txs" => Self::Transactions(CompressedTransactionsPayload::from_array(payload)?),
            "consensus" => Self::Consensus(ConsensusPayload::from_array(payload)?),
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }

    fn empty(message: Self, payload: &[u8]) -> NetworkResult<Self> {
        if payload.is_empty() {
            Ok(message)
        } else {
            Err(NetworkError::Io(IoError::invalid_format(format!(
                "{} carries no payload",
                message.command()
            ))))
        }
    }

    /// Full object message for an inventory.
    pub fn from_inventory(inventory: Inventory) -> Self {
        match inventory {
            Inventory::Block(block) => Self::Block(block),
            Inventory::Transaction(tx) => Self::Transaction(tx),
            Inventory::Consensus(payload) => Self::Consensus(payload),
        }
    }

    /// Single `inv` for one hash, `invgroup` otherwise.
    pub fn announce(inv_type: InventoryType, hashes: &[UInt256]) -> Vec<Self> {
        match hashes {
            [] => Vec::new(),
            [hash] => vec![Self::Inv(InvPayload::new(inv_type, *hash))],
            _ => InvGroupPayload::create_groups(inv_type, hashes)
                .into_iter()
                .map(Self::InvGroup)
                .collect(),
        }
    }

    /// Single `getdata` for one hash, `getdatagroup` otherwise.
    pub fn request(inv_type: InventoryType, hashes: &[UInt256]) -> Vec<Self> {
        match hashes {
            [] => Vec::new(),
            [hash] => vec![Self::GetData(InvPayload::new(inv_type, *hash))],
            _ => InvGroupPayload::create_groups(inv_type, hashes)
                .into_iter()
                .map(Self::GetDataGroup)
                .collect(),
        }
    }

    fn inventory_type(&self) -> Option<InventoryType> {
        match self {
            Self::Inv(payload) | Self::GetData(payload) => Some(payload.inv_type),
            Self::InvGroup(payload) | Self::GetDataGroup(payload) => Some(payload.inv_type),
            _ => None,
        }
    }

    /// Bulk transaction traffic goes to the low lane.
    pub fn is_high_priority(&self) -> bool {
        match self {
            Self::Transaction(_) | Self::Transactions(_) => false,
            _ => self.inventory_type() != Some(InventoryType::Transaction),
        }
    }

    /// Idempotent requests: one pending copy is enough.
    pub fn is_collapsible(&self) -> bool {
        matches!(self, Self::GetAddr | Self::GetHeaders(_) | Self::GetBlocks(_))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_core::hash256;

    #[test]
    fn test_decode_dispatches_on_command() {
        let ping = Message::Ping(PingPayload::new(42, 7));
        let decoded = Message::decode("ping", &ping.encode()).unwrap();
        assert_eq!(decoded, ping);

        let get_headers = Message::GetHeaders(GetBlocksPayload::new(hash256(b"tip")));
        assert_eq!(
            Message::decode("getheaders", &get_headers.encode()).unwrap(),
            get_headers
        );
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            Message::decode("alert", &[]),
            Err(NetworkError::UnknownCommand(_))
        ));
        assert!(Message::decode("verack", &[1]).is_err());
        // "ping" payload decoded as "block"
        let ping = Message::Ping(PingPayload::new(1, 1)).encode();
        assert!(Message::decode("block", &ping).is_err());
    }

    #[test]
    fn test_priority_and_collapse() {
        let tx = Transaction::miner(1, Vec::new());
        assert!(!Message::Transaction(tx.clone()).is_high_priority());
        assert!(!Message::Inv(InvPayload::new(InventoryType::Transaction, tx.hash())).is_high_priority());
        assert!(Message::Inv(InvPayload::new(InventoryType::Block, UInt256::zero())).is_high_priority());
        assert!(Message::Verack.is_high_priority());

        assert!(Message::GetHeaders(GetBlocksPayload::new(UInt256::zero())).is_collapsible());
        assert!(!Message::Verack.is_collapsible());
    }

    #[test]
    fn test_request_uses_group_for_many() {
        let hashes: Vec<UInt256> = (0..3u8).map(|i| hash256(&[i])).collect();
        assert!(matches!(
            Message::request(InventoryType::Block, &hashes[..1])[..],
            [Message::GetData(_)]
        ));
        assert!(matches!(
            Message::request(InventoryType::Block, &hashes)[..],
            [Message::GetDataGroup(_)]
        ));
        assert!(Message::announce(InventoryType::Block, &[]).is_empty());
    }
}
