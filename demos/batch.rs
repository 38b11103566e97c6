//! Batching example: concurrent operations against an in-process server
//!
//! Three queries issued together travel in one `/batch` request. The server
//! is an `EdenHandler`, so no network is involved.

use async_trait::async_trait;
use eden::client::{EdenHandler, EdenHttpRequest, EdenHttpResponse, RequestBody};
use eden::core::batch::{decode_batch_form, decode_batch_query, encode_batch_response, BatchEntry};
use eden::core::{EdenFetchError, EdenResult};
use eden::{
    http_batch_link, logger_link, retry_link, EdenClient, EdenRequestParams, HttpBatchLinkOptions,
    OperationOptions, RetryLinkOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Deserialize)]
struct AddInput {
    a: i64,
    b: i64,
}

#[derive(Serialize)]
struct Sum {
    sum: i64,
}

#[derive(Default)]
struct MathServer {
    requests: AtomicUsize,
}

impl MathServer {
    fn answer(entry: &BatchEntry) -> EdenResult {
        let input = entry.query.get("a").zip(entry.query.get("b"));
        let parsed = input.and_then(|(a, b)| {
            serde_json::from_value::<AddInput>(serde_json::json!({
                "a": a.as_str().and_then(|s| s.parse::<i64>().ok()),
                "b": b.as_str().and_then(|s| s.parse::<i64>().ok()),
            }))
            .ok()
        });
        match (entry.path.as_str(), parsed) {
            ("/add", Some(input)) => EdenResult::ok(serde_json::json!(Sum { sum: input.a + input.b })),
            (path, _) => EdenResult::err(EdenFetchError::new(404, serde_json::json!(format!("no route {}", path)))),
        }
    }
}

#[async_trait]
impl EdenHandler for MathServer {
    async fn handle(&self, request: EdenHttpRequest) -> EdenHttpResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let Ok(url) = url::Url::parse(&request.url) else {
            return EdenHttpResponse::text(400, "bad url");
        };
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let entries = match &request.body {
            Some(RequestBody::Form(form)) => decode_batch_form(form, &request.headers),
            _ => decode_batch_query(&query, &request.headers),
        };
        match entries {
            Ok(entries) => {
                let results: Vec<EdenResult> = entries.iter().map(Self::answer).collect();
                EdenHttpResponse::json(200, &encode_batch_response(&results))
            }
            Err(e) => EdenHttpResponse::text(400, e.to_string()),
        }
    }
}

async fn add(client: &EdenClient, a: i64, b: i64) -> eden::Result<EdenResult> {
    client
        .query(
            "/add",
            EdenRequestParams::new().with_query("a", a.to_string()).with_query("b", b.to_string()),
            OperationOptions::default(),
        )
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("eden_client=debug"))
        .init();

    let server = Arc::new(MathServer::default());
    let handler: Arc<dyn EdenHandler> = server.clone();

    let client = EdenClient::new(vec![
        logger_link(),
        retry_link(RetryLinkOptions::new(|_op, error, attempts| {
            !error.is_fetch() && attempts < 3
        })),
        http_batch_link(HttpBatchLinkOptions::new(
            EdenRequestParams::new().with_domain(handler),
        )),
    ]);

    let (one, two, missing) = tokio::join!(
        add(&client, 1, 2),
        add(&client, 20, 22),
        client.query("/sub", EdenRequestParams::new(), OperationOptions::default()),
    );

    let (one, two, missing) = (one?, two?, missing?);
    tracing::info!(result = ?one.data, "1 + 2");
    tracing::info!(result = ?two.data, "20 + 22");
    tracing::info!(error = ?missing.error, "/sub");
    println!("{} batch request(s) served", server.requests.load(Ordering::SeqCst));

    Ok(())
}
