//! Integration tests for stopping workers.

mod common;

use std::time::Duration;

use bluechat::bluetooth::{ChatEvent, ServiceRecord};
use bluechat::ConnectionState;
use common::{eventually, peer, Harness, WAIT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[tokio::test]
async fn test_shutdown_closes_listener() {
    let mut h = Harness::new();
    h.coordinator.start_listening();
    assert_eq!(h.transport.open_listeners(), 1);

    h.coordinator.shutdown();
    assert_eq!(h.transport.open_listeners(), 0);
    assert!(h.transport.dial(peer(1), &ServiceRecord::SECURE).is_err());
    assert_eq!(
        h.drain().await,
        vec![
            ChatEvent::StateChanged(ConnectionState::Listening),
            ChatEvent::StateChanged(ConnectionState::Idle),
        ]
    );
}

#[tokio::test]
async fn test_shutdown_aborts_pending_connect() {
    let mut h = Harness::new();
    h.transport.add_unresponsive_peer(peer(2));
    h.coordinator.connect_to(peer(2));
    assert_eq!(h.transport.pending_outbound(), 1);

    h.coordinator.shutdown();
    assert_eq!(h.transport.pending_outbound(), 0);

    let events = h.drain().await;
    assert_eq!(
        events,
        vec![
            ChatEvent::StateChanged(ConnectionState::Connecting),
            ChatEvent::StateChanged(ConnectionState::Idle),
        ]
    );
}

#[tokio::test]
async fn test_shutdown_ends_session_quietly() {
    let mut h = Harness::new();
    let mut inbox = h.transport.add_peer(peer(3));
    h.coordinator.connect_to(peer(3));
    h.wait_for_state(ConnectionState::InSession).await;
    let mut remote = inbox.recv().await.unwrap();

    h.coordinator.shutdown();
    assert_eq!(h.transport.open_channels(), 0);

    // The peer observes end of stream.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, remote.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    let events = h.drain().await;
    assert!(events.contains(&ChatEvent::StateChanged(ConnectionState::Idle)));
    assert!(!events.contains(&ChatEvent::ConnectionLost));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ChatEvent::DataReceived(_))));
}

#[tokio::test]
async fn test_no_data_after_shutdown() {
    let mut h = Harness::new();
    h.coordinator.start_listening();
    let mut remote = h.transport.dial(peer(4), &ServiceRecord::SECURE).unwrap();
    h.wait_for_state(ConnectionState::InSession).await;
    assert!(matches!(h.next_event().await, ChatEvent::Connected { .. }));

    h.coordinator.shutdown();
    // Writes may still land in the pipe buffer; none may surface.
    let _ = remote.write_all(b"too late").await;

    assert_eq!(
        h.drain().await,
        vec![ChatEvent::StateChanged(ConnectionState::Idle)]
    );
}

#[tokio::test]
async fn test_shutdown_during_read_releases_channel_at_once() {
    let mut h = Harness::new();
    h.coordinator.start_listening();
    let mut remote = h.transport.dial(peer(9), &ServiceRecord::SECURE).unwrap();
    h.wait_for_state(ConnectionState::InSession).await;

    // Let the session park in its read.
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.coordinator.shutdown();
    assert_eq!(h.transport.open_channels(), 0);

    // The pipe is already gone, without yielding to the session task.
    let mut buf = [0u8; 4];
    let n = timeout(Duration::ZERO, remote.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_relisten_rebinds_while_old_accept_is_parked() {
    let mut h = Harness::new();
    h.transport.add_unresponsive_peer(peer(10));

    h.coordinator.start_listening();
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.coordinator.connect_to(peer(10));
    h.coordinator.start_listening();
    assert_eq!(h.coordinator.state(), ConnectionState::Listening);
    assert_eq!(h.transport.open_listeners(), 1);
    h.assert_workers_match_state();

    h.coordinator.shutdown();
    let events = h.drain().await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, ChatEvent::ConnectionFailed(_))));
    assert_eq!(
        events,
        vec![
            ChatEvent::StateChanged(ConnectionState::Listening),
            ChatEvent::StateChanged(ConnectionState::Connecting),
            ChatEvent::StateChanged(ConnectionState::Listening),
            ChatEvent::StateChanged(ConnectionState::Idle),
        ]
    );
}

#[tokio::test]
async fn test_unaccepted_channel_closed_with_listener() {
    let mut h = Harness::new();
    h.coordinator.start_listening();
    h.transport.add_unresponsive_peer(peer(5));

    // Replace the listener before its accept loop can run.
    let mut remote = h.transport.dial(peer(6), &ServiceRecord::SECURE).unwrap();
    h.coordinator.connect_to(peer(5));

    let mut buf = [0u8; 4];
    let n = timeout(WAIT, remote.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
    assert!(eventually(|| h.transport.open_channels() == 0).await);
    h.assert_workers_match_state();
    assert_eq!(h.coordinator.state(), ConnectionState::Connecting);

    h.coordinator.shutdown();
    let events = h.drain().await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, ChatEvent::Connected { .. })));
}

#[tokio::test]
async fn test_drop_stops_workers() {
    let h = Harness::new();
    h.coordinator.start_listening();
    let transport = h.transport.clone();
    assert_eq!(transport.open_listeners(), 1);

    drop(h);
    assert_eq!(transport.open_listeners(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rapid_switching_leaves_no_stray_resources() {
    let mut h = Harness::new();
    h.transport.add_unresponsive_peer(peer(7));

    for round in 0..50u8 {
        h.coordinator.start_listening();
        if round % 3 == 0 {
            let _ = h.transport.dial(peer(8), &ServiceRecord::SECURE);
        }
        h.coordinator.connect_to(peer(7));
        h.assert_workers_match_state();
    }
    h.coordinator.shutdown();

    assert!(eventually(|| h.transport.open_channels() == 0).await);
    assert_eq!(h.transport.open_listeners(), 0);
    assert_eq!(h.transport.pending_outbound(), 0);
    assert_eq!(h.coordinator.active_workers().count(), 0);
    assert_eq!(
        h.drain().await.last(),
        Some(&ChatEvent::StateChanged(ConnectionState::Idle))
    );
}
