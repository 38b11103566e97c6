//! Link-chain RPC client for eden
//!
//! Every call is an [`Operation`] that runs through a chain of links and
//! comes back as an observable of result envelopes. Middleware links add
//! cross-cutting behaviour; terminal links talk to a transport.
//!
//! # Core Features
//!
//! - **HTTP**: One request per operation through reqwest or an in-process
//!   handler, with path params, query, headers, files and transformers
//! - **Batching**: Operations issued in the same tick share one `/batch`
//!   request, over GET or multipart POST
//! - **WebSocket**: A persistent socket with lazy connect, keep-alive,
//!   reconnection and subscription resumption
//! - **Middleware**: Retry, split and logging links
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use eden_client::{http_batch_link, split_link, ws_link, EdenClient, EdenRequestParams,
//!     HttpBatchLinkOptions, OperationOptions};
//! use eden_client::ws::{WsClient, WsClientOptions};
//! use eden_core::OperationType;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = WsClient::new(WsClientOptions::new("ws://localhost:3000/ws").with_lazy(5_000))?;
//!     let client = EdenClient::new(vec![split_link(
//!         |op| op.op_type == OperationType::Subscription,
//!         vec![ws_link(ws, None)],
//!         vec![http_batch_link(HttpBatchLinkOptions::new(
//!             EdenRequestParams::new().with_domain("http://localhost:3000"),
//!         ))],
//!     )]);
//!
//!     let result = client
//!         .query("/hello", EdenRequestParams::new(), OperationOptions::default())
//!         .await?;
//!     println!("Result: {:?}", result.data);
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
pub mod data_loader;
pub mod fetcher;
pub mod links;
mod metrics;
mod operation;
mod params;
mod resolve;
pub mod response;
pub mod ws;

pub use client::{EdenClient, OperationOptions};
pub use client_builder::EdenClientBuilder;
pub use data_loader::{BatchLoader, DataLoader, LoadHandle};
pub use fetcher::{
    default_fetcher, Domain, EdenHandler, EdenHttpRequest, EdenHttpResponse, Fetcher,
    ReqwestFetcher, RequestBody, ResponseBody,
};
pub use links::{
    create_chain, http_batch_link, http_link, logger_link, retry_link, split_link, ws_link,
    BatchMethod, HttpBatchLinkOptions, LinkContext, Next, OperationLink, OperationObservable,
    RetryLinkOptions,
};
pub use metrics::ClientMetrics;
pub use operation::Operation;
pub use params::{EdenRequestParams, FetchOptions, HeadersInit, RequestOptions};
pub use resolve::{query_string, resolve_eden_request, substitute_path};
pub use ws::{WsClient, WsClientOptions};
