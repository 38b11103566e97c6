//! WebSocket request/response integration tests

mod common;

use common::{data_response, error_response, MockWsServer};
use eden_client::ws::NoReconnect;
use eden_client::{ws_link, EdenClient, EdenRequestParams, OperationOptions, WsClient, WsClientOptions};
use eden_core::{ConnectionState, EdenFetchError, Error};
use serde_json::json;

fn client_for(ws: &WsClient) -> EdenClient {
    EdenClient::new(vec![ws_link(ws.clone(), None)])
}

#[tokio::test]
async fn test_query_round_trip() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .query("/hello", EdenRequestParams::new().with_query("name", "eden"), OperationOptions::new())
                .await
        }
    });

    let mut conn = server.accept().await;
    let request = conn.recv_request().await;
    assert_eq!(request["method"], json!("query"));
    assert_eq!(request["params"]["path"], json!("/hello"));
    assert_eq!(request["params"]["input"], json!({"name": "eden"}));

    conn.send(data_response(&request["id"], None, json!("hi eden"))).await;

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.json(), Some(&json!("hi eden")));
    assert_eq!(ws.outstanding(), 0);
    ws.close();
}

#[tokio::test]
async fn test_mutation_sends_body_as_input() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .mutation("/posts", EdenRequestParams::new().with_body(json!({"title": "t"})), OperationOptions::new())
                .await
        }
    });

    let mut conn = server.accept().await;
    let request = conn.recv_request().await;
    assert_eq!(request["method"], json!("mutation"));
    assert_eq!(request["params"]["input"], json!({"title": "t"}));
    conn.send(data_response(&request["id"], None, json!({"id": 1}))).await;

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.json(), Some(&json!({"id": 1})));
    ws.close();
}

#[tokio::test]
async fn test_concurrent_requests_share_one_frame() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            futures::join!(
                client.query("/a", EdenRequestParams::new(), OperationOptions::new()),
                client.query("/b", EdenRequestParams::new(), OperationOptions::new()),
            )
        }
    });

    let mut conn = server.accept().await;
    let frame = conn.recv().await;
    let requests = frame.as_array().expect("batched frame is an array");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["params"]["path"], json!("/a"));
    assert_eq!(requests[1]["params"]["path"], json!("/b"));

    conn.send(json!([
        data_response(&requests[1]["id"], None, json!("b")),
        data_response(&requests[0]["id"], None, json!("a")),
    ]))
    .await;

    let (a, b) = pending.await.unwrap();
    assert_eq!(a.unwrap().json(), Some(&json!("a")));
    assert_eq!(b.unwrap().json(), Some(&json!("b")));
    ws.close();
}

#[tokio::test]
async fn test_error_response_lands_in_result() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.query("/secret", EdenRequestParams::new(), OperationOptions::new()).await }
    });

    let mut conn = server.accept().await;
    let request = conn.recv_request().await;
    conn.send(error_response(&request["id"], 401, json!("Unauthorized"))).await;

    let result = pending.await.unwrap().unwrap();
    assert!(result.data.is_null());
    assert_eq!(result.error, Some(EdenFetchError::new(401, json!("Unauthorized"))));
    ws.close();
}

#[tokio::test]
async fn test_connection_params_sent_first() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(
        WsClientOptions::new(server.url())
            .with_reconnect(NoReconnect)
            .with_connection_params(json!({"token": "abc"})),
    )
    .unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.query("/me", EdenRequestParams::new(), OperationOptions::new()).await }
    });

    let mut conn = server.accept().await;
    let first = conn.recv().await;
    assert_eq!(first, json!({"method": "connectionParams", "data": {"token": "abc"}}));

    let request = conn.recv_request().await;
    assert_eq!(request["params"]["path"], json!("/me"));
    conn.send(data_response(&request["id"], None, json!("me"))).await;
    assert!(pending.await.unwrap().is_ok());
    ws.close();
}

#[tokio::test]
async fn test_query_fails_when_connection_closes() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();
    let client = client_for(&ws);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.query("/slow", EdenRequestParams::new(), OperationOptions::new()).await }
    });

    let mut conn = server.accept().await;
    conn.recv_request().await;
    conn.close(4000, "bye").await;

    let outcome = pending.await.unwrap();
    assert_eq!(
        outcome,
        Err(Error::ConnectionClosed {
            code: Some(4000),
            reason: "bye".to_string(),
        })
    );
    assert_eq!(ws.outstanding(), 0);
}

#[tokio::test]
async fn test_non_lazy_client_connects_immediately() {
    let mut server = MockWsServer::start().await;
    let ws = WsClient::new(WsClientOptions::new(server.url()).with_reconnect(NoReconnect)).unwrap();

    let _conn = server.accept().await;
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while ws.state() != ConnectionState::Pending {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never reported an open connection");
    ws.close();
    assert_eq!(ws.state(), ConnectionState::Idle);
}
