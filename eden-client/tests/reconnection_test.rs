//! Client reconnection integration tests
//!
//! Tests for reconnection strategies, server-requested reconnects and
//! keep-alive failures.

mod common;

use common::{data_response, MockWsServer};
use eden_client::ws::{ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
use eden_client::{ws_link, EdenClient, EdenRequestParams, OperationOptions, WsClient, WsClientOptions};
use eden_core::{ConnectionState, Error};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_server_requested_reconnect_resends_requests() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = EdenClient::new(vec![ws_link(ws.clone(), None)]);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.query("/slow", EdenRequestParams::new(), OperationOptions::new()).await }
    });

    let mut first = server.accept().await;
    let request = first.recv_request().await;
    first.send(json!({"method": "reconnect"})).await;

    let mut second = server.accept().await;
    let resent = second.recv_request().await;
    assert_eq!(resent, request);
    second.send(data_response(&resent["id"], None, json!("done"))).await;

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.json(), Some(&json!("done")));
    ws.close();
}

#[tokio::test]
async fn test_reconnects_after_close_with_strategy() {
    let mut server = MockWsServer::start().await;
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let (on_open, on_close) = (Arc::clone(&opened), Arc::clone(&closed));

    let ws = WsClient::new(
        WsClientOptions::new(server.url())
            .with_reconnect(FixedDelay::new(Duration::from_millis(10)))
            .on_open(move || {
                on_open.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_error| {
                on_close.fetch_add(1, Ordering::SeqCst);
            }),
    )
    .unwrap();

    let first = server.accept().await;
    first.close(1001, "going away").await;
    let _second = server.accept().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while opened.load(Ordering::SeqCst) < 2 || ws.state() != ConnectionState::Pending {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client did not reopen");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    ws.close();
}

#[tokio::test]
async fn test_no_reconnect_gives_up_and_goes_idle() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();

    let first = server.accept().await;
    first.close(1000, "").await;

    assert!(server.try_accept(Duration::from_millis(200)).await.is_none());
    tokio::time::timeout(Duration::from_secs(5), async {
        while ws.state() != ConnectionState::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client did not settle in idle");
}

#[tokio::test]
async fn test_keep_alive_timeout_fails_outstanding_query() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(
        WsClientOptions::new(server.url())
            .with_reconnect(NoReconnect)
            .with_keep_alive(Duration::from_millis(50), Duration::from_millis(50)),
    )
    .unwrap();
    let client = EdenClient::new(vec![ws_link(ws.clone(), None)]);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.query("/slow", EdenRequestParams::new(), OperationOptions::new()).await }
    });

    let mut conn = server.accept().await;
    assert!(conn.recv_text().await.contains("/slow"));
    assert_eq!(conn.recv_text().await, "PING");

    match pending.await.unwrap() {
        Err(Error::ConnectionClosed { code: None, reason }) => {
            assert_eq!(reason, Error::KeepAliveTimeout.to_string());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(conn.closed_within(Duration::from_secs(1)).await);
}

#[test]
fn test_backoff_schedule() {
    let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500))
        .with_max_attempts(4);

    assert_eq!(backoff.next_delay(0), Some(Duration::ZERO));
    assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_delay(3), Some(Duration::from_millis(500)));
    assert_eq!(backoff.next_delay(4), None);

    backoff.reset();
    assert_eq!(backoff.next_delay(0), Some(Duration::ZERO));
}
