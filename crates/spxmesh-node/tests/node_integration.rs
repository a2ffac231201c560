//! End-to-end coverage across two in-process nodes: handshake, chat
//! delivery, and block enforcement. Exercises the real transports on
//! loopback rather than mocking the peer manager.

use std::net::SocketAddr;
use std::time::Duration;

use spxmesh_crypto::KeyPair;
use spxmesh_identity::Address;
use spxmesh_node::{Node, NodeConfig, NodeEvent};
use spxmesh_protocol::PermissionKind;

fn ephemeral_config(data_dir: &std::path::Path) -> NodeConfig {
    NodeConfig {
        udp_port: 0,
        tcp_port: 0,
        discovery_port: 0,
        vlan_enabled: false,
        data_dir: data_dir.to_path_buf(),
        display_name: None,
        vlan_capabilities: Vec::new(),
        bootstrap_peers: Vec::new(),
    }
}

async fn start_node() -> (Node, tokio::sync::mpsc::UnboundedReceiver<NodeEvent>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ephemeral_config(dir.path());
    let identity = KeyPair::generate();
    let (node, events) = Node::start(config, identity).await.unwrap();
    (node, events, dir)
}

/// The node was started with an ephemeral (`0`) UDP port, so the
/// bound port only becomes known once the transport is up; read it
/// back off the shareable address rather than the static config.
fn udp_endpoint(node: &Node) -> SocketAddr {
    let shareable = node.shareable_address().unwrap();
    let (_, endpoint) = shareable.split_once('@').unwrap();
    endpoint.parse().unwrap()
}

async fn expect_event<F: Fn(&NodeEvent) -> bool>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<NodeEvent>,
    predicate: F,
) -> NodeEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for expected event")
}

#[tokio::test]
async fn handshake_connects_both_nodes() {
    let (a, mut a_events, _a_dir) = start_node().await;
    let (b, mut b_events, _b_dir) = start_node().await;

    let remote = a.connect(udp_endpoint(&b)).await.unwrap();
    assert_eq!(remote, b.local_address());

    expect_event(&mut a_events, |e| matches!(e, NodeEvent::PeerConnected { peer } if *peer == remote)).await;
    expect_event(&mut b_events, |e| matches!(e, NodeEvent::PeerConnected { peer } if *peer == a.local_address())).await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn chat_message_is_delivered_to_the_recipient() {
    let (a, _a_events, _a_dir) = start_node().await;
    let (b, mut b_events, _b_dir) = start_node().await;

    let remote = a.connect(udp_endpoint(&b)).await.unwrap();
    expect_event(&mut b_events, |e| matches!(e, NodeEvent::PeerConnected { .. })).await;

    a.send_chat(remote, "hello mesh".to_string(), None).unwrap();
    let event = expect_event(&mut b_events, |e| matches!(e, NodeEvent::ChatReceived { .. })).await;
    match event {
        NodeEvent::ChatReceived { peer, content, reply_to } => {
            assert_eq!(peer, a.local_address());
            assert_eq!(content, "hello mesh");
            assert!(reply_to.is_none());
        }
        _ => unreachable!(),
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn permission_round_trip_authorizes_the_requester() {
    let (a, mut a_events, _a_dir) = start_node().await;
    let (b, mut b_events, _b_dir) = start_node().await;

    a.connect(udp_endpoint(&b)).await.unwrap();
    expect_event(&mut b_events, |e| matches!(e, NodeEvent::PeerConnected { .. })).await;

    let request_id = a.request_permission(b.local_address(), PermissionKind::Contact, Some("alice".into())).unwrap();
    let requested = expect_event(&mut b_events, |e| matches!(e, NodeEvent::PermissionRequested { .. })).await;
    let (peer, seen_request_id, permission) = match requested {
        NodeEvent::PermissionRequested { peer, request_id, permission, .. } => (peer, request_id, permission),
        _ => unreachable!(),
    };
    assert_eq!(seen_request_id, request_id);

    b.respond_permission(peer, seen_request_id, permission, true, None).unwrap();
    let responded = expect_event(&mut a_events, |e| matches!(e, NodeEvent::PermissionResponded { .. })).await;
    match responded {
        NodeEvent::PermissionResponded { request_id: got, granted, .. } => {
            assert_eq!(got, request_id);
            assert!(granted);
        }
        _ => unreachable!(),
    }
    assert!(b.peer_manager().peer(&a.local_address()).unwrap().permissions.contains(spxmesh_protocol::Permissions::CONTACT));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn blocked_peer_cannot_be_authorized() {
    let (a, _a_events, _a_dir) = start_node().await;
    let intruder = Address::derive(&KeyPair::generate().public_key());

    a.block(intruder);
    let result = a.respond_permission(intruder, uuid::Uuid::new_v4(), PermissionKind::Contact, true, None);
    assert!(result.is_err());

    a.stop().await;
}
