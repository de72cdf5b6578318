mod common;

use appchain_core::{hash256, InventoryType, PeerId, UInt256};
use appchain_io::PriorityMailbox;
use appchain_network::{
    GetBlocksPayload, InvGroupPayload, InvPayload, Message, RemoteCommand, TaskCommand,
    TaskManager, HEADER_TASK, TASK_TIMEOUT,
};
use std::time::Duration;

fn register(
    manager: &mut TaskManager,
    peer: u64,
    start_height: u32,
) -> PriorityMailbox<RemoteCommand> {
    let (mailbox, remote) = PriorityMailbox::new();
    manager.handle(TaskCommand::Register {
        peer: PeerId(peer),
        start_height,
        remote,
    });
    mailbox
}

fn drain(mailbox: &mut PriorityMailbox<RemoteCommand>) -> Vec<Message> {
    let mut sent = Vec::new();
    while let Some(command) = mailbox.try_recv() {
        if let RemoteCommand::Send(message) = command {
            sent.push(message);
        }
    }
    sent
}

fn announce(manager: &mut TaskManager, peer: u64, hash: UInt256) {
    manager.handle(TaskCommand::NewTasks {
        peer: PeerId(peer),
        payload: InvPayload::new(InventoryType::Block, hash),
    });
}

fn new_manager() -> TaskManager {
    let (mailbox, _sender) = PriorityMailbox::new();
    TaskManager::new(common::empty_chain(), mailbox)
}

#[tokio::test]
async fn test_same_block_requested_from_one_peer() {
    let mut manager = new_manager();
    let mut first = register(&mut manager, 1, 0);
    let mut second = register(&mut manager, 2, 0);
    let hash = hash256(b"block");

    announce(&mut manager, 1, hash);
    announce(&mut manager, 2, hash);

    assert_eq!(
        drain(&mut first),
        vec![Message::GetData(InvPayload::new(InventoryType::Block, hash))]
    );
    assert!(drain(&mut second).is_empty());
    assert!(manager.is_in_flight(&hash));
    assert_eq!(manager.session(&PeerId(2)).unwrap().available_count(), 1);
}

#[tokio::test]
async fn test_disconnect_releases_task_to_other_peer() {
    let mut manager = new_manager();
    let mut first = register(&mut manager, 1, 0);
    let mut second = register(&mut manager, 2, 0);
    let hash = hash256(b"block");
    announce(&mut manager, 1, hash);
    announce(&mut manager, 2, hash);
    drain(&mut first);

    manager.handle(TaskCommand::Terminated { peer: PeerId(1) });

    assert_eq!(manager.session_count(), 1);
    assert_eq!(
        drain(&mut second),
        vec![Message::GetData(InvPayload::new(InventoryType::Block, hash))]
    );
    assert!(manager.is_in_flight(&hash));
    assert_eq!(manager.session(&PeerId(2)).unwrap().task_count(), 1);
}

#[tokio::test]
async fn test_group_announcement_skips_in_flight_hashes() {
    let mut manager = new_manager();
    let mut first = register(&mut manager, 1, 0);
    let mut second = register(&mut manager, 2, 0);
    let [a, b, c] = [hash256(b"a"), hash256(b"b"), hash256(b"c")];

    manager.handle(TaskCommand::NewGroupTasks {
        peer: PeerId(1),
        payload: InvGroupPayload::new(InventoryType::Block, vec![a, b]),
    });
    manager.handle(TaskCommand::NewGroupTasks {
        peer: PeerId(2),
        payload: InvGroupPayload::new(InventoryType::Block, vec![b, c]),
    });

    assert_eq!(
        drain(&mut first),
        vec![Message::GetDataGroup(InvGroupPayload::new(
            InventoryType::Block,
            vec![a, b]
        ))]
    );
    assert_eq!(
        drain(&mut second),
        vec![Message::GetData(InvPayload::new(InventoryType::Block, c))]
    );
}

#[tokio::test]
async fn test_completed_hash_is_not_requested_again() {
    let mut manager = new_manager();
    let mut first = register(&mut manager, 1, 0);
    let mut second = register(&mut manager, 2, 0);
    let hash = hash256(b"tx");
    manager.handle(TaskCommand::NewTasks {
        peer: PeerId(1),
        payload: InvPayload::new(InventoryType::Transaction, hash),
    });
    drain(&mut first);

    manager.handle(TaskCommand::TaskCompleted {
        peer: PeerId(1),
        hash,
    });
    assert!(!manager.is_in_flight(&hash));
    assert!(!manager.session(&PeerId(1)).unwrap().has_task());

    manager.handle(TaskCommand::NewTasks {
        peer: PeerId(2),
        payload: InvPayload::new(InventoryType::Transaction, hash),
    });
    assert!(drain(&mut second).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_expires_stale_tasks() {
    let mut manager = new_manager();
    let mut first = register(&mut manager, 1, 0);
    let hash = hash256(b"slow");
    announce(&mut manager, 1, hash);
    drain(&mut first);

    tokio::time::advance(TASK_TIMEOUT / 2).await;
    manager.handle(TaskCommand::Sweep);
    assert!(manager.is_in_flight(&hash));

    tokio::time::advance(TASK_TIMEOUT / 2 + Duration::from_secs(1)).await;
    manager.handle(TaskCommand::Sweep);
    assert!(!manager.is_in_flight(&hash));
    assert!(!manager.session(&PeerId(1)).unwrap().has_task());
}

#[tokio::test]
async fn test_header_sync_is_exclusive() {
    let stack = common::Stack::start().await;
    let genesis = stack.tip().hash();
    let (mailbox, _sender) = PriorityMailbox::new();
    let mut manager = TaskManager::new(stack.chain.clone(), mailbox);

    let mut first = register(&mut manager, 1, 10);
    let mut second = register(&mut manager, 2, 10);

    assert_eq!(
        drain(&mut first),
        vec![Message::GetHeaders(GetBlocksPayload::new(genesis))]
    );
    assert!(manager.is_in_flight(&HEADER_TASK));
    // block range sync only, while the first peer holds the header task
    assert_eq!(
        drain(&mut second),
        vec![Message::GetBlocks(GetBlocksPayload::new(genesis))]
    );

    manager.handle(TaskCommand::Terminated { peer: PeerId(1) });
    assert_eq!(
        drain(&mut second),
        vec![Message::GetHeaders(GetBlocksPayload::new(genesis))]
    );
}
