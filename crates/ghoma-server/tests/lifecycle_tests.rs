//! Connection lifecycle tests
//!
//! Reconnects, heartbeat eviction, handshake timeouts and shutdown.

use ghoma_server::ServerConfig;
use ghoma_test_utils::{EventCollector, TestServer, DEFAULT_TIMEOUT};
use std::time::Duration;

const MAC: [u8; 3] = [0x35, 0x23, 0xD3];

#[tokio::test]
async fn test_reconnect_replaces_previous_record() {
    let server = TestServer::start().await;
    let events = EventCollector::start(server.server());

    let mut first = server.register_plug(MAC).await.unwrap();
    let second = server.register_plug(MAC).await.unwrap();

    // The superseded connection is closed by the server
    assert!(first.wait_closed(DEFAULT_TIMEOUT).await);
    assert!(events.wait_for_count(3, DEFAULT_TIMEOUT).await);
    assert_eq!(events.kinds(), vec!["new", "closed", "reregistered"]);

    let device = server.server().get("3523d3").unwrap();
    assert_eq!(device.reregistered_count, 1);
    assert_eq!(server.server().device_count(), 1);

    // The new connection still works
    second.send_heartbeat().await.unwrap();
    assert!(events.wait_for_kind("heartbeat", DEFAULT_TIMEOUT).await.is_some());
    assert_eq!(events.count_of("new"), 1);
}

#[tokio::test]
async fn test_silent_device_is_evicted() {
    let config = ServerConfig {
        heartbeat_timeout_secs: 1,
        ..Default::default()
    };
    let server = TestServer::start_with_config(config).await;
    let events = EventCollector::start(server.server());

    let mut plug = server.register_plug(MAC).await.unwrap();

    let closed = events
        .wait_for_kind("closed", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(closed.device().id, "3523d3");
    assert!(plug.wait_closed(DEFAULT_TIMEOUT).await);
    assert_eq!(server.server().device_count(), 0);
}

#[tokio::test]
async fn test_handshake_timeout_closes_connection() {
    let config = ServerConfig {
        handshake_timeout_secs: 1,
        ..Default::default()
    };
    let server = TestServer::start_with_config(config).await;
    let events = EventCollector::start(server.server());

    let mut plug = server.connect_plug(MAC).await.unwrap();
    assert!(plug.wait_closed(Duration::from_secs(5)).await);

    // Nothing was ever registered, so nothing is announced
    assert_eq!(events.count(), 0);
    assert_eq!(server.server().device_count(), 0);
}

#[tokio::test]
async fn test_peer_close_emits_closed() {
    let server = TestServer::start().await;
    let plug = server.register_plug(MAC).await.unwrap();
    let events = EventCollector::start(server.server());

    plug.close().await;

    let closed = events.wait_for_kind("closed", DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(closed.device().id, "3523d3");
    assert_eq!(server.server().device_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.count_of("closed"), 1);
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let mut server = TestServer::start().await;
    let events = EventCollector::start(server.server());

    let mut a = server.register_plug([0x01, 0x00, 0x00]).await.unwrap();
    let mut b = server.register_plug([0x02, 0x00, 0x00]).await.unwrap();
    let mut pending = server.connect_plug([0x03, 0x00, 0x00]).await.unwrap();

    server.shutdown().await;

    assert!(a.wait_closed(DEFAULT_TIMEOUT).await);
    assert!(b.wait_closed(DEFAULT_TIMEOUT).await);
    assert!(pending.wait_closed(DEFAULT_TIMEOUT).await);
    assert_eq!(server.server().device_count(), 0);
    assert!(server.server().is_shutting_down());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.count_of("closed"), 2);
}
