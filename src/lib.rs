//! Eden - link-chain RPC client
//!
//! This is the convenience crate that re-exports the eden sub-crates. Use it
//! if you want a single dependency for the whole client.
//!
//! # Architecture
//!
//! Eden is organized into two crates:
//!
//! - **eden-core**: Observable, transformers, forms, wire types, codecs,
//!   error handling, observability
//! - **eden-client**: Request resolution, links, HTTP/batch/WebSocket
//!   transports and the `EdenClient` facade
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use eden::{http_batch_link, EdenClient, EdenRequestParams, HttpBatchLinkOptions, OperationOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EdenClient::new(vec![http_batch_link(HttpBatchLinkOptions::new(
//!         EdenRequestParams::new().with_domain("http://localhost:3000"),
//!     ))]);
//!
//!     let result = client
//!         .mutation(
//!             "/posts",
//!             EdenRequestParams::new().with_body(serde_json::json!({"title": "hello"})),
//!             OperationOptions::default(),
//!         )
//!         .await?;
//!     println!("Result: {:?}", result.data);
//!
//!     Ok(())
//! }
//! ```

pub use eden_client as client;
pub use eden_core as core;

pub use eden_client::{
    http_batch_link, http_link, logger_link, retry_link, split_link, ws_link, EdenClient,
    EdenClientBuilder, EdenRequestParams, HttpBatchLinkOptions, OperationOptions,
    RetryLinkOptions, WsClient, WsClientOptions,
};
pub use eden_core::{EdenFetchError, EdenResult, Error, OperationResultEnvelope, OperationType, Result};
