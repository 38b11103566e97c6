//! Core building blocks for the eden RPC client
//!
//! This crate holds everything that does not perform I/O:
//!
//! - **Observable**: the push-based stream every operation is built on
//! - **Transformers**: payload serializers and the id registry shared with the server
//! - **Forms**: request bodies, multipart data and files
//! - **Types**: results, envelopes, connection state and WebSocket messages
//! - **Codecs**: WebSocket frames and the batch wire format
//! - **Error handling**: [`Error`] and [`EdenFetchError`]
//! - **Observability**: OpenTelemetry and `tracing` setup
//!
//! The `eden-client` crate builds the resolver, links and transports on top.
//!
//! # Example
//!
//! ```rust
//! use eden_core::batch::{decode_batch_query, encode_batch_query, BatchEntry};
//!
//! let entries = vec![BatchEntry {
//!     path: "/users/1".to_string(),
//!     method: "GET".to_string(),
//!     ..Default::default()
//! }];
//!
//! let encoded = encode_batch_query(&entries);
//! let decoded = decode_batch_query(&encoded.query, &encoded.headers).unwrap();
//! assert_eq!(decoded[0].path, "/users/1");
//! ```

pub mod batch;
pub mod codec;
pub mod error;
pub mod form;
pub mod observability;
pub mod observable;
pub mod transformer;
pub mod types;

pub use error::{EdenFetchError, Error, Result, TRANSPORT_ERROR_STATUS};
pub use form::{EdenBody, EdenFile, FormData, FormValue};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use observable::{BehaviorSubject, Observable, Observer, PartialObserver, Subscription, Teardown};
pub use transformer::{
    CombinedTransformer, DataTransformer, FnTransformer, ResolvedTransformer, TransformerInput,
};
pub use types::{
    ConnectionState, EdenData, EdenResult, EventStream, Id, OperationResultEnvelope,
    OperationType, ResponseInfo, WsIncoming, WsMethod, WsRequest, WsRequestParams, WsResponse,
    WsResult, WsResultType,
};
