//! Genesis block creation.
//!
//! Block 0 is a pure function of the protocol settings: every node of a
//! chain builds the same block and the same utility token id.

use appchain_config::ProtocolSettings;
use appchain_core::merkle;
use appchain_core::script::{consensus_address, opcode};
use appchain_core::{Block, Fixed8, Header, Transaction, TransactionData, UInt160, UInt256, Witness};

/// Nonce of the genesis miner transaction and consensus data of block 0.
pub const GENESIS_NONCE: u32 = 2_083_236_893;

/// Name of the native token that pays network fees.
pub const UTILITY_TOKEN_NAME: &str = "AppChainGas";

/// Total utility token supply, in whole units.
pub const UTILITY_TOKEN_SUPPLY: i64 = 100_000_000;

fn utility_token_registration(settings: &ProtocolSettings) -> Transaction {
    Transaction::new(
        0,
        UInt160::zero(),
        TransactionData::Register {
            name: UTILITY_TOKEN_NAME.to_string(),
            precision: 8,
            amount: Fixed8::from_raw(UTILITY_TOKEN_SUPPLY * Fixed8::DECIMALS),
            owner: consensus_address(&settings.standby_validators),
        },
        Vec::new(),
    )
}

/// Id of the utility token: the hash of its registration transaction.
pub fn utility_token_id(settings: &ProtocolSettings) -> UInt256 {
    utility_token_registration(settings).hash()
}

/// Builds block 0: miner transaction, utility token registration and the
/// issue of the whole supply to the standby validators' consensus address.
pub fn genesis_block(settings: &ProtocolSettings) -> Block {
    let validators_address = consensus_address(&settings.standby_validators);
    let registration = utility_token_registration(settings);
    let issue = Transaction::new(
        0,
        validators_address,
        TransactionData::Issue {
            asset_id: registration.hash(),
            to: validators_address,
            value: Fixed8::from_raw(UTILITY_TOKEN_SUPPLY * Fixed8::DECIMALS),
        },
        Vec::new(),
    );
    let transactions = vec![
        Transaction::miner(GENESIS_NONCE, Vec::new()),
        registration,
        issue,
    ];
    let hashes: Vec<UInt256> = transactions.iter().map(Transaction::hash).collect();
    let header = Header::new(
        0,
        UInt256::zero(),
        merkle::compute_root(&hashes),
        settings.genesis_timestamp,
        0,
        u64::from(GENESIS_NONCE),
        validators_address,
        Witness::new(Vec::new(), vec![opcode::PUSH1]),
    );
    Block::new(header, transactions)
}
