//! Operation, result and WebSocket message types
//!
//! # Results
//!
//! Every link emits [`OperationResultEnvelope`] values. A query or mutation
//! produces exactly one `Data` envelope; a subscription produces `Started`,
//! any number of `Data` envelopes, and `Stopped`. WebSocket links also relay
//! connection-state transitions as `State` envelopes to subscriptions.
//!
//! # WebSocket messages
//!
//! Outgoing requests:
//!
//! ```json
//! {"id": 1, "method": "subscription", "params": {"path": "/chat", "input": null, "lastEventId": "41"}}
//! {"id": 1, "method": "subscription.stop"}
//! ```
//!
//! Incoming frames are either server requests (`{"method": "reconnect"}`) or
//! responses keyed by the request id:
//!
//! ```json
//! {"id": 1, "result": {"type": "data", "id": "42", "data": {"text": "hi"}}}
//! {"id": 2, "error": {"status": 404, "value": "Not found"}}
//! ```

use crate::error::{EdenFetchError, Error, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Request identifier on the WebSocket
///
/// Serialized untagged so ids appear as plain numbers or strings on the wire.
///
/// ```rust
/// use eden_core::Id;
///
/// let id: Id = 42u64.into();
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n as i64)
    }
}

/// Kind of logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        }
    }

    /// HTTP method used when the caller does not set one
    pub fn default_method(&self) -> &'static str {
        match self {
            OperationType::Query | OperationType::Subscription => "GET",
            OperationType::Mutation => "POST",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ValueStream = BoxStream<'static, Result<Value>>;

/// Lazily decoded `text/event-stream` body
///
/// The stream can be taken exactly once; clones share the same handle.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<Mutex<Option<ValueStream>>>,
}

impl EventStream {
    pub fn new(stream: ValueStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Take the stream; `None` if it was already taken
    pub fn take(&self) -> Option<ValueStream> {
        crate::observable::lock(&self.inner).take()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventStream")
    }
}

impl PartialEq for EventStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Decoded response payload
#[derive(Debug, Clone, PartialEq)]
pub enum EdenData {
    /// JSON, coerced text, or parsed multipart form
    Json(Value),
    /// `application/octet-stream` body
    Binary(Bytes),
    /// `text/event-stream` body
    Stream(EventStream),
}

impl EdenData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EdenData::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            EdenData::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EdenData::Json(Value::Null))
    }
}

impl Default for EdenData {
    fn default() -> Self {
        EdenData::Json(Value::Null)
    }
}

impl From<Value> for EdenData {
    fn from(value: Value) -> Self {
        EdenData::Json(value)
    }
}

/// Status and headers of the HTTP response behind a result
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseInfo {
    pub status: u16,
    /// Lower-cased header names
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one logical request: `data` on success, `error` on failure
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdenResult {
    pub data: EdenData,
    pub error: Option<EdenFetchError>,
    pub response: Option<ResponseInfo>,
}

impl EdenResult {
    /// Successful result
    pub fn ok(data: impl Into<EdenData>) -> Self {
        Self {
            data: data.into(),
            error: None,
            response: None,
        }
    }

    /// Failed result with null data
    pub fn err(error: EdenFetchError) -> Self {
        Self {
            data: EdenData::default(),
            error: Some(error),
            response: None,
        }
    }

    pub fn with_response(mut self, response: ResponseInfo) -> Self {
        self.response = Some(response);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The JSON payload of a successful result
    pub fn json(&self) -> Option<&Value> {
        if self.error.is_some() {
            return None;
        }
        self.data.as_json()
    }

    /// Explicitly opt into `Result` semantics
    pub fn into_result(self) -> std::result::Result<EdenData, EdenFetchError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// WebSocket connection state
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No socket and no attempt in progress
    Idle,
    /// Opening a socket; `error` holds the cause of the last failure, if any
    Connecting { error: Option<Error> },
    /// Socket open; requests flush
    Pending,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Pending => "pending",
        }
    }
}

/// Event emitted by links
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResultEnvelope {
    /// A result; `id` is the tracked event id of subscription data
    Data {
        id: Option<String>,
        result: EdenResult,
    },
    /// The server started a subscription
    Started,
    /// The server stopped a subscription
    Stopped,
    /// Connection-state change, relayed to subscriptions
    State(ConnectionState),
}

impl OperationResultEnvelope {
    /// Untracked data envelope
    pub fn data(result: EdenResult) -> Self {
        OperationResultEnvelope::Data { id: None, result }
    }

    pub fn as_result(&self) -> Option<&EdenResult> {
        match self {
            OperationResultEnvelope::Data { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// WebSocket request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WsMethod {
    #[serde(rename = "query")]
    Query,
    #[serde(rename = "mutation")]
    Mutation,
    #[serde(rename = "subscription")]
    Subscription,
    #[serde(rename = "subscription.stop")]
    SubscriptionStop,
}

impl From<OperationType> for WsMethod {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Query => WsMethod::Query,
            OperationType::Mutation => WsMethod::Mutation,
            OperationType::Subscription => WsMethod::Subscription,
        }
    }
}

/// Parameters of an outgoing WebSocket request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequestParams {
    pub path: String,
    #[serde(default)]
    pub input: Value,
    #[serde(
        rename = "lastEventId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_event_id: Option<String>,
}

/// Outgoing WebSocket request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequest {
    pub id: Id,
    pub method: WsMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<WsRequestParams>,
}

impl WsRequest {
    pub fn new(id: Id, method: WsMethod, params: WsRequestParams) -> Self {
        Self {
            id,
            method,
            params: Some(params),
        }
    }

    /// Stop message for the subscription with `id`
    pub fn stop(id: Id) -> Self {
        Self {
            id,
            method: WsMethod::SubscriptionStop,
            params: None,
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.method == WsMethod::Subscription
    }
}

/// Kind of a WebSocket response result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsResultType {
    Data,
    Started,
    Stopped,
}

/// Result part of a WebSocket response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResult {
    #[serde(rename = "type")]
    pub kind: WsResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response to a WebSocket request
#[derive(Debug, Clone, PartialEq)]
pub struct WsResponse {
    pub id: Id,
    pub outcome: std::result::Result<WsResult, EdenFetchError>,
}

/// Decoded incoming WebSocket frame
#[derive(Debug, Clone, PartialEq)]
pub enum WsIncoming {
    /// Server asks the client to reconnect
    Reconnect,
    /// Response to one of our requests
    Response(WsResponse),
}
