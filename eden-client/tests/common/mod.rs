//! Common test utilities for eden-client integration tests
//!
//! This module provides a scriptable WebSocket server and an in-process
//! batch handler, so client behavior can be tested without a real server.

#![allow(dead_code)]

use async_trait::async_trait;
use eden_client::{EdenHandler, EdenHttpRequest, EdenHttpResponse, RequestBody};
use eden_core::batch::{decode_batch_form, decode_batch_query, encode_batch_response};
use eden_core::EdenResult;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

/// Mock WebSocket server handing every accepted connection to the test
pub struct MockWsServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(MockConnection { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            task,
        }
    }

    /// Get the WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Whether a connection arrives within `within`
    pub async fn try_accept(&mut self, within: Duration) -> Option<MockConnection> {
        tokio::time::timeout(within, self.connections.recv()).await.ok().flatten()
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One accepted client connection
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    /// Next JSON frame from the client
    ///
    /// Answers keep-alive pings and skips non-text frames.
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("connection closed")
                .expect("socket error");
            match message {
                Message::Text(text) if text == "PING" => {
                    self.ws.send(Message::Text("PONG".to_string())).await.unwrap();
                }
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => {}
            }
        }
    }

    /// Next text frame as sent, keep-alive frames included
    pub async fn recv_text(&mut self) -> String {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("connection closed")
                .expect("socket error");
            if let Message::Text(text) = message {
                return text;
            }
        }
    }

    /// Whether the client closed the socket within `within`
    pub async fn closed_within(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .is_ok()
    }

    /// Next frame expected to be a single request object
    pub async fn recv_request(&mut self) -> Value {
        let value = self.recv().await;
        assert!(value.is_object(), "expected one request, got {}", value);
        value
    }

    pub async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Close the connection with a close frame
    pub async fn close(mut self, code: u16, reason: &str) {
        let _ = self
            .ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            }))
            .await;
    }
}

/// `data` result for request `id`, tracked by `event_id` when given
pub fn data_response(id: &Value, event_id: Option<&str>, data: Value) -> Value {
    let mut result = json!({"type": "data", "data": data});
    if let Some(event_id) = event_id {
        result["id"] = json!(event_id);
    }
    json!({"id": id, "result": result})
}

pub fn started_response(id: &Value) -> Value {
    json!({"id": id, "result": {"type": "started"}})
}

pub fn stopped_response(id: &Value) -> Value {
    json!({"id": id, "result": {"type": "stopped"}})
}

pub fn error_response(id: &Value, status: u16, value: Value) -> Value {
    json!({"id": id, "error": {"status": status, "value": value}})
}

/// In-process batch server recording every request it receives
///
/// Each batch entry is answered with its method, path and body.
#[derive(Default)]
pub struct RecordingBatchServer {
    pub requests: Mutex<Vec<EdenHttpRequest>>,
}

impl RecordingBatchServer {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl EdenHandler for RecordingBatchServer {
    async fn handle(&self, request: EdenHttpRequest) -> EdenHttpResponse {
        self.requests.lock().unwrap().push(request.clone());
        let url = url::Url::parse(&request.url).unwrap();
        if !url.path().ends_with("/batch") {
            return EdenHttpResponse::json(200, &json!({"path": url.path(), "method": request.method}));
        }

        let entries = match &request.body {
            Some(RequestBody::Form(form)) => decode_batch_form(form, &request.headers),
            _ => {
                let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
                decode_batch_query(&query, &request.headers)
            }
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => return EdenHttpResponse::text(400, e.to_string()),
        };

        let results: Vec<EdenResult> = entries
            .iter()
            .map(|entry| {
                EdenResult::ok(json!({
                    "path": entry.path,
                    "method": entry.method,
                    "body": entry.body.as_ref().and_then(|b| b.as_json()).cloned().unwrap_or(Value::Null),
                }))
            })
            .collect();
        EdenHttpResponse::json(200, &encode_batch_response(&results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_url() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
    }

    #[test]
    fn test_data_response_shape() {
        let response = data_response(&json!(1), Some("9"), json!("x"));
        assert_eq!(response, json!({"id": 1, "result": {"type": "data", "data": "x", "id": "9"}}));
    }
}
