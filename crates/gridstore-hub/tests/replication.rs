//! End-to-end replication over an in-memory duplex link.

use gridstore_core::{EngineReplication, KeyValueStore, ReplicatedStore, ReplicationEntry};
use gridstore_hub::{serve_peer, Connection, ConnectionError, HubConfig, ReplicationHub};
use gridstore_proto::{Bootstrap, Frame, FrameBody};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn config(identifier: u8) -> HubConfig {
    HubConfig {
        local_identifier: identifier,
        reply_timeout: Some(Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn stores_converge_over_a_duplex_link() {
    let (initiator_side, responder_side) = tokio::io::duplex(64 * 1024);
    let a = ReplicatedStore::new(1, 4);
    let b = ReplicatedStore::new(2, 4);
    a.put("orders/1", json!({"qty": 5}));
    b.put("orders/2", json!({"qty": 7}));

    let responder = Arc::new(Connection::new(responder_side));
    let b_server = b.clone();
    let server = tokio::spawn(async move { serve_peer(responder, b_server, 2).await });

    let connection = Arc::new(Connection::new(initiator_side));
    let hub = ReplicationHub::new(connection, config(1));
    let session = hub.bootstrap(a.clone()).await.unwrap();
    assert_eq!(session.remote_identifier, 2);

    // Both pre-handshake writes cross over.
    wait_for(|| a.get("orders/2").is_some() && b.get("orders/1").is_some()).await;
    assert_eq!(a.get("orders/2"), Some(json!({"qty": 7})));
    assert_eq!(b.get("orders/1"), Some(json!({"qty": 5})));

    // Live writes flow in both directions, removals included.
    a.put("orders/3", json!({"qty": 9}));
    b.remove("orders/2");
    wait_for(|| b.get("orders/3").is_some() && a.get("orders/2").is_none()).await;
    assert_eq!(b.get("orders/3"), Some(json!({"qty": 9})));

    session.task.abort();
    server.abort();
}

#[tokio::test]
async fn bootstrap_skips_entries_the_peer_already_holds() {
    let (initiator_side, peer_side) = tokio::io::duplex(64 * 1024);
    let a = ReplicatedStore::new(1, 4);
    a.put("old", json!("old"));
    let old_timestamp = {
        let probe = a.acquire_modification_iterator(9);
        let mut timestamp = 0;
        probe.for_each(&mut |entry| timestamp = entry.timestamp);
        timestamp
    };
    a.put("new", json!("new"));

    let peer = Connection::new(peer_side);
    let connection = Arc::new(Connection::new(initiator_side));
    let hub = ReplicationHub::new(connection, config(1));

    let script = tokio::spawn(async move {
        let frame = peer.recv_any().await.unwrap();
        assert!(matches!(frame.body, FrameBody::IdentifierRequest));
        peer.send(&Frame::new(frame.tid, FrameBody::IdentifierReply(2)))
            .await
            .unwrap();

        let frame = peer.recv_any().await.unwrap();
        let boot_tid = frame.tid;
        match frame.body {
            FrameBody::Bootstrap(boot) => assert_eq!(boot.identifier, 1),
            other => panic!("expected a bootstrap, got {other:?}"),
        }
        peer.send(&Frame::new(
            boot_tid,
            FrameBody::Bootstrap(Bootstrap::new(old_timestamp, 2)),
        ))
        .await
        .unwrap();

        // Only the entry newer than the declared high-water mark arrives.
        let frame = peer
            .recv_reply(boot_tid, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        match frame.body {
            FrameBody::ReplicationEvent(entry) => {
                assert_eq!(entry.key, "new");
                assert_eq!(entry.identifier, 1);
            }
            other => panic!("expected a replication event, got {other:?}"),
        }
        let err = peer
            .recv_reply(boot_tid, Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::ReplyTimeout { .. }));

        // An applied event must not be echoed back to its originator.
        peer.send(&Frame::new(
            boot_tid,
            FrameBody::ReplicationEvent(ReplicationEntry {
                key: "remote".to_string(),
                value: Some(json!(9)),
                timestamp: old_timestamp + 10_000,
                identifier: 2,
            }),
        ))
        .await
        .unwrap();
        let err = peer
            .recv_reply(boot_tid, Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::ReplyTimeout { .. }));
    });

    let session = hub.bootstrap(a.clone()).await.unwrap();
    assert_eq!(session.remote_identifier, 2);
    script.await.unwrap();

    wait_for(|| a.get("remote").is_some()).await;
    assert_eq!(a.get("remote"), Some(json!(9)));
    session.task.abort();
}

#[tokio::test]
async fn handshake_times_out_against_a_silent_peer() {
    let (initiator_side, responder_side) = tokio::io::duplex(1024);
    let _silent = responder_side;
    let a = ReplicatedStore::new(1, 4);

    let connection = Arc::new(Connection::new(initiator_side));
    let hub = ReplicationHub::new(
        connection,
        HubConfig {
            local_identifier: 1,
            reply_timeout: Some(Duration::from_millis(50)),
        },
    );

    let err = hub.bootstrap(a).await.unwrap_err();
    match err {
        gridstore_hub::HubError::Connection(ConnectionError::ReplyTimeout { .. }) => {}
        other => panic!("expected a reply timeout, got {other:?}"),
    }
}
