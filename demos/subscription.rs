//! Subscription example: a ticker over WebSocket
//!
//! A small server streams five ticks for every subscription it receives.
//! The client routes subscriptions to a lazy WebSocket link and everything
//! else to HTTP, then prints each event as it arrives.

use eden::client::ws::ExponentialBackoff;
use eden::core::{OperationResultEnvelope, PartialObserver};
use eden::{http_link, split_link, ws_link, EdenClient, EdenRequestParams, OperationType, WsClient, WsClientOptions};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accept one connection and answer every subscription with five ticks
async fn run_ticker(listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (stream, _) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    while let Some(message) = ws.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        let requests = match serde_json::from_str::<Value>(&text)? {
            Value::Array(items) => items,
            single => vec![single],
        };
        for request in requests {
            if request["method"] != "subscription" {
                continue;
            }
            let id = request["id"].clone();
            ws.send(Message::Text(json!({"id": id, "result": {"type": "started"}}).to_string()))
                .await?;
            for tick in 1..=5 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let event = json!({"id": id, "result": {"type": "data", "id": tick.to_string(), "data": {"tick": tick}}});
                ws.send(Message::Text(event.to_string())).await?;
            }
            ws.send(Message::Text(json!({"id": id, "result": {"type": "stopped"}}).to_string()))
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = run_ticker(listener).await {
            tracing::error!(error = %e, "Ticker server failed");
        }
    });

    let ws = WsClient::new(
        WsClientOptions::new(url)
            .with_lazy(1_000)
            .with_reconnect(ExponentialBackoff::new(Duration::from_millis(200), Duration::from_secs(5))),
    )?;
    let client = EdenClient::new(vec![split_link(
        |op| op.op_type == OperationType::Subscription,
        vec![ws_link(ws.clone(), None)],
        vec![http_link(EdenRequestParams::new().with_domain("http://127.0.0.1:3000"))],
    )]);

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let done_tx = std::sync::Mutex::new(Some(done_tx));
    let subscription = client.subscription(
        "/ticks",
        EdenRequestParams::new(),
        PartialObserver::new()
            .next(|envelope| match envelope {
                OperationResultEnvelope::Data { id, result } => {
                    println!("event {:?}: {:?}", id, result.data)
                }
                OperationResultEnvelope::State(state) => println!("connection: {}", state.as_str()),
                other => println!("{:?}", other),
            })
            .error(|e| eprintln!("subscription failed: {}", e))
            .complete(move || {
                if let Some(tx) = done_tx.lock().ok().and_then(|mut tx| tx.take()) {
                    let _ = tx.send(());
                }
            }),
    );

    let _ = tokio::time::timeout(Duration::from_secs(5), done_rx).await;
    subscription.unsubscribe();
    ws.close();
    Ok(())
}
