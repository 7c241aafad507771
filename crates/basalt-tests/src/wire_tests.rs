//! Wire-level protocol tests against a scripted raw peer.

use crate::harness::{ScriptedPeer, TestNode};
use basalt_chain::{BlockId, Digest32, SignedBlock};
use basalt_net::{Message, Status};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

fn peer_hello() -> Message {
    Message::Hello(basalt_net::Hello {
        network_version: 0,
        chain_id: Digest32::zero(),
        node_id: Digest32([0x42u8; 32]),
        p2p_address: "scripted.example.com:9876".to_string(),
        os: "linux".to_string(),
        agent: "scripted-peer".to_string(),
    })
}

fn peer_status(lib: u32, head: BlockId) -> Message {
    Message::Status(Status {
        last_irreversible_block_number: lib,
        head_block_id: head,
    })
}

/// Complete the handshake and subscribe both directions.
async fn establish(node: &TestNode, peer: &mut ScriptedPeer) {
    // the node speaks first on an accepted connection
    let hello = peer.recv_named("hello").await;
    match hello.message {
        Message::Hello(hello) => assert_eq!(hello.network_version, 0),
        _ => unreachable!(),
    }

    peer.send(peer_hello()).await;
    // connected: the first outbound after entry is a status
    peer.recv_named("status").await;

    // matching tips make the node subscribe to us
    peer.send(peer_status(0, Digest32::zero())).await;
    peer.recv_named("subscribe").await;

    // and our subscription resolves straight to real-time forwarding
    peer.send(Message::Subscribe).await;

    // confirm the feed is live end-to-end: a fresh block must arrive whether
    // the subscription or the block lands first (real-time or catch-up path)
    let probe = node.produce_block(b"probe");
    let frame = peer.recv_named("block").await;
    match frame.message {
        Message::Block(block) => assert_eq!(block.id(), probe.id()),
        other => panic!("unexpected message: {}", other.name()),
    }
}

#[tokio::test]
async fn test_handshake_carries_local_identity() {
    let node = TestNode::listening("agent-wire").await;
    let mut peer = ScriptedPeer::connect(node.addr()).await;

    let hello = peer.recv_named("hello").await;
    match hello.message {
        Message::Hello(hello) => {
            assert_eq!(hello.agent, "agent-wire");
            assert_eq!(hello.chain_id, Digest32::zero());
            assert!(!hello.node_id.is_zero());
            assert_eq!(hello.os, std::env::consts::OS);
        }
        other => panic!("unexpected message: {}", other.name()),
    }
}

#[tokio::test]
async fn test_subscribed_peer_receives_produced_block() {
    let node = TestNode::listening("agent-wire").await;
    let mut peer = ScriptedPeer::connect(node.addr()).await;
    establish(&node, &mut peer).await;

    let block = node.produce_block(b"fresh");
    let frame = peer.recv_named("block").await;
    match frame.message {
        Message::Block(received) => assert_eq!(received.id(), block.id()),
        other => panic!("unexpected message: {}", other.name()),
    }
}

#[tokio::test]
async fn test_block_is_never_echoed_back() {
    let node = TestNode::listening("agent-wire").await;
    let mut peer = ScriptedPeer::connect(node.addr()).await;
    establish(&node, &mut peer).await;

    // hand the node a block it has never seen
    let block = Arc::new(SignedBlock {
        previous: Digest32::zero(),
        number: 1,
        timestamp_ms: 1,
        producer: "scripted".to_string(),
        payload: Bytes::from_static(b"from the peer"),
    });
    peer.send(Message::Block(block.clone())).await;

    // the node caches it and fans it out, but the delivering session is
    // already acked: nothing may come back
    let names = peer.drain_for(Duration::from_millis(600)).await;
    assert!(
        !names.contains(&"block"),
        "block echoed back to its sender: {names:?}"
    );
}

#[tokio::test]
async fn test_duplicate_block_sent_once() {
    let node = TestNode::listening("agent-wire").await;
    let mut peer = ScriptedPeer::connect(node.addr()).await;
    establish(&node, &mut peer).await;

    let block = node.produce_block(b"fresh");
    let frame = peer.recv_named("block").await;

    // replaying the node's own block must not provoke a resend
    peer.send_raw(frame.raw.clone()).await;
    let names = peer.drain_for(Duration::from_millis(600)).await;
    assert!(
        !names.contains(&"block"),
        "block delivered twice: {names:?}"
    );
    assert_eq!(
        match frame.message {
            Message::Block(received) => received.id(),
            _ => unreachable!(),
        },
        block.id()
    );
}

#[tokio::test]
async fn test_unsubscribe_stops_the_feed() {
    let node = TestNode::listening("agent-wire").await;
    let mut peer = ScriptedPeer::connect(node.addr()).await;
    establish(&node, &mut peer).await;

    peer.send(Message::Unsubscribe).await;
    // give the unsubscribe a moment to land before producing
    tokio::time::sleep(Duration::from_millis(200)).await;

    node.produce_block(b"unseen");
    let names = peer.drain_for(Duration::from_millis(600)).await;
    assert!(
        !names.contains(&"block"),
        "block delivered after unsubscribe: {names:?}"
    );
}

#[tokio::test]
async fn test_catch_up_feeds_missing_chain() {
    let node = TestNode::listening("agent-wire").await;
    // three blocks exist before the peer appears
    let first = node.produce_block(b"one");
    let second = node.produce_block(b"two");
    let third = node.produce_block(b"three");

    let mut peer = ScriptedPeer::connect(node.addr()).await;
    peer.recv_named("hello").await;
    peer.send(peer_hello()).await;
    peer.recv_named("status").await;

    // an empty peer subscribing triggers the peer-behind catch-up
    peer.send(peer_status(0, Digest32::zero())).await;
    peer.send(Message::Subscribe).await;

    let mut ids = Vec::new();
    while ids.len() < 3 {
        let frame = peer.recv_named("block").await;
        match frame.message {
            Message::Block(block) => ids.push(block.id()),
            _ => unreachable!(),
        }
    }
    // oldest first, ending at the node's head
    assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
}
