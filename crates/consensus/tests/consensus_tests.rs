mod common;

use appchain_consensus::{primary_index, ConsensusMessage, ConsensusTimer, Role};
use appchain_core::{
    sha256, ConsensusPayload, Fixed8, KeyPair, RelayResultReason, Transaction, TransactionData,
};
use appchain_ledger::genesis::genesis_block;
use common::{exchange, start_nodes, TestNode};

fn user_transaction(nonce: u32) -> Transaction {
    let user = KeyPair::from_private_key(&sha256(b"consensus-user")).unwrap();
    Transaction::new(
        nonce,
        user.script_hash(),
        TransactionData::Invocation {
            script: vec![0x51],
            gas_price: Fixed8::ZERO,
            gas_limit: Fixed8::ZERO,
        },
        Vec::new(),
    )
    .sign(&user)
}

fn start_all(nodes: &mut [TestNode]) {
    for node in nodes.iter_mut() {
        node.service.start();
    }
    exchange(nodes);
}

#[tokio::test]
async fn test_single_validator_produces_block() {
    let mut nodes = start_nodes(1).await;
    start_all(&mut nodes);
    let node = &mut nodes[0];
    assert_eq!(node.service.context().block_index, 1);
    assert_eq!(node.service.context().role, Role::Primary { request_sent: false });

    node.fire_timer();
    let (_, blocks) = node.drain();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].index(), 1);
    assert!(node.service.context().flags.block_sent);
    assert_eq!(
        node.blockchain.relay_block(blocks[0].clone()).await,
        RelayResultReason::Succeed
    );
}

#[tokio::test]
async fn test_four_validators_agree_on_block() {
    let mut nodes = start_nodes(4).await;
    let tx = user_transaction(7);
    for node in &nodes {
        assert_eq!(node.chain.mempool().try_add(tx.clone()), RelayResultReason::Succeed);
    }
    start_all(&mut nodes);

    let primary = primary_index(1, 0, 4);
    for (index, node) in nodes.iter().enumerate() {
        let context = node.service.context();
        assert_eq!(context.m(), 3);
        assert_eq!(context.primary_index, primary);
        assert_eq!(context.role.is_primary(), index == primary);
    }

    nodes[primary].fire_timer();
    let relayed = exchange(&mut nodes);
    assert_eq!(nodes[primary].announced, vec![tx.hash()]);

    let genesis = genesis_block(nodes[0].chain.settings());
    let expected = relayed[0][0].hash();
    for (index, blocks) in relayed.iter().enumerate() {
        assert_eq!(blocks.len(), 1, "node {index} relayed {} blocks", blocks.len());
        let block = &blocks[0];
        assert_eq!(block.hash(), expected);
        assert!(block.verify_structure());
        assert!(block.header().verify_witness(&genesis.header().next_consensus()));
        assert_eq!(block.transactions().len(), 2);
        assert_eq!(block.transactions()[1].hash(), tx.hash());
        assert!(nodes[index].service.context().flags.block_sent);
    }

    for node in &nodes {
        assert_eq!(
            node.blockchain.relay_block(relayed[0][0].clone()).await,
            RelayResultReason::Succeed
        );
    }
}

#[tokio::test]
async fn test_silent_primary_triggers_view_change() {
    let mut nodes = start_nodes(4).await;
    start_all(&mut nodes);
    let old_primary = primary_index(1, 0, 4);

    for index in 0..nodes.len() {
        if index != old_primary {
            nodes[index].fire_timer();
        }
    }
    exchange(&mut nodes);

    let new_primary = primary_index(1, 1, 4);
    assert_eq!(new_primary, 0);
    for (index, node) in nodes.iter().enumerate() {
        let context = node.service.context();
        assert_eq!(context.view_number, 1, "node {index}");
        assert_eq!(context.primary_index, new_primary);
        assert!(!context.flags.view_changing);
        if index == new_primary {
            assert_eq!(context.role, Role::Primary { request_sent: false });
        } else {
            assert_eq!(context.role, Role::Backup { request_received: false });
        }
    }

    nodes[new_primary].fire_timer();
    let relayed = exchange(&mut nodes);
    let hashes: Vec<_> = relayed.iter().map(|blocks| blocks[0].hash()).collect();
    assert!(hashes.iter().all(|hash| *hash == hashes[0]));
}

#[tokio::test]
async fn test_change_view_needs_quorum() {
    let mut nodes = start_nodes(4).await;
    start_all(&mut nodes);
    let primary = primary_index(1, 0, 4);
    let backup = (primary + 1) % 4;

    nodes[backup].fire_timer();
    exchange(&mut nodes);
    for node in &nodes {
        assert_eq!(node.service.context().view_number, 0);
    }
    assert!(nodes[backup].service.context().flags.view_changing);
    assert_eq!(nodes[primary].service.context().expected_view[backup], 1);
}

#[tokio::test]
async fn test_stale_timer_ignored() {
    let mut nodes = start_nodes(4).await;
    start_all(&mut nodes);
    let backup = (primary_index(1, 0, 4) + 1) % 4;
    let node = &mut nodes[backup];
    let first = node.timer.unwrap();

    node.service.on_timer(first);
    let (payloads, _) = node.drain();
    assert_eq!(payloads.len(), 1);
    assert_eq!(node.service.context().expected_view[backup], 1);
    let second = node.timer.unwrap();
    assert_ne!(first, second);

    node.service.on_timer(first);
    node.service.on_timer(ConsensusTimer {
        height: second.height + 1,
        ..second
    });
    let (payloads, _) = node.drain();
    assert!(payloads.is_empty());
    assert_eq!(node.service.context().expected_view[backup], 1);
}

#[tokio::test]
async fn test_prepare_request_from_backup_ignored() {
    let mut nodes = start_nodes(4).await;
    start_all(&mut nodes);
    let primary = primary_index(1, 0, 4);
    let backup = (primary + 1) % 4;

    nodes[primary].fire_timer();
    let (payloads, _) = nodes[primary].drain();
    let request = payloads
        .into_iter()
        .find(|payload| {
            matches!(
                ConsensusMessage::from_bytes(payload.data()),
                Ok(ConsensusMessage::PrepareRequest { .. })
            )
        })
        .unwrap();

    // Same message, claimed by a backup.
    let forged = ConsensusPayload::new(
        request.version(),
        request.prev_hash(),
        request.block_index(),
        backup as u16,
        request.timestamp(),
        request.data().to_vec(),
    );
    let target = (backup + 1) % 4;
    nodes[target].service.on_consensus_payload(&forged);
    let (payloads, _) = nodes[target].drain();
    assert!(payloads.is_empty());
    assert!(!nodes[target].service.context().role.request_received());

    nodes[target].service.on_consensus_payload(&request);
    let (payloads, _) = nodes[target].drain();
    assert_eq!(payloads.len(), 1);
    assert!(nodes[target].service.context().flags.signature_sent);
}

#[tokio::test]
async fn test_payload_for_other_height_dropped() {
    let mut nodes = start_nodes(4).await;
    start_all(&mut nodes);
    let primary = primary_index(1, 0, 4);
    nodes[primary].fire_timer();
    let (payloads, _) = nodes[primary].drain();
    let request = &payloads[0];

    let wrong_height = ConsensusPayload::new(
        request.version(),
        request.prev_hash(),
        request.block_index() + 1,
        request.validator_index(),
        request.timestamp(),
        request.data().to_vec(),
    );
    let target = (primary + 1) % 4;
    nodes[target].service.on_consensus_payload(&wrong_height);
    let (payloads, _) = nodes[target].drain();
    assert!(payloads.is_empty());
    assert!(!nodes[target].service.context().role.request_received());
}

#[tokio::test]
async fn test_missing_transaction_is_requested_then_completes() {
    let mut nodes = start_nodes(4).await;
    let tx = user_transaction(11);
    let primary = primary_index(1, 0, 4);
    let late = (primary + 1) % 4;
    for (index, node) in nodes.iter().enumerate() {
        if index != late {
            node.chain.mempool().try_add(tx.clone());
        }
    }
    start_all(&mut nodes);

    nodes[primary].fire_timer();
    exchange(&mut nodes);
    assert_eq!(nodes[late].restarted, vec![tx.hash()]);
    assert!(!nodes[late].service.context().flags.signature_sent);

    nodes[late].service.on_transaction(tx);
    let (payloads, _) = nodes[late].drain();
    assert_eq!(payloads.len(), 1);
    assert!(nodes[late].service.context().flags.signature_sent);
}
