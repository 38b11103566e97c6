//! WebSocket frame encoding and decoding
//!
//! Requests flushed in the same tick travel in one text frame: a single
//! request as a JSON object, several as a JSON array. Incoming frames may
//! likewise hold one message or an array of them.
//!
//! # Examples
//!
//! ```rust
//! use eden_core::codec;
//! use eden_core::{Id, WsIncoming};
//!
//! let frames = codec::decode_incoming(r#"{"id":1,"result":{"type":"data","data":5}}"#).unwrap();
//! match &frames[0] {
//!     WsIncoming::Response(response) => assert_eq!(response.id, Id::Number(1)),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::error::{EdenFetchError, Error, Result};
use crate::types::{WsIncoming, WsRequest, WsResponse, WsResult};
use serde::Serialize;
use serde_json::{json, Value};

/// Status reported when the server sends an error without one
const DEFAULT_ERROR_STATUS: u16 = 500;

/// Encode any serializable value to JSON text
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a flush: one object for a single request, an array otherwise
pub fn encode_requests(requests: &[WsRequest]) -> Result<String> {
    match requests {
        [single] => encode(single),
        many => encode(&many),
    }
}

/// First frame of a connection carrying the connection parameters
pub fn encode_connection_params(data: &Value) -> Result<String> {
    encode(&json!({ "method": "connectionParams", "data": data }))
}

/// Decode an incoming text frame into its messages
///
/// # Errors
///
/// Returns `Error::Serialization` if the frame is not JSON or a message is
/// neither a known server request nor a response.
pub fn decode_incoming(text: &str) -> Result<Vec<WsIncoming>> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Array(items) => items.into_iter().map(decode_message).collect(),
        single => Ok(vec![decode_message(single)?]),
    }
}

fn decode_message(value: Value) -> Result<WsIncoming> {
    let Value::Object(mut map) = value else {
        return Err(Error::Serialization("message is not an object".to_string()));
    };

    if let Some(method) = map.get("method").and_then(Value::as_str) {
        return match method {
            "reconnect" => Ok(WsIncoming::Reconnect),
            other => Err(Error::Serialization(format!(
                "unknown server method: {}",
                other
            ))),
        };
    }

    let id = map
        .remove("id")
        .ok_or_else(|| Error::Serialization("response without id".to_string()))
        .and_then(|id| serde_json::from_value(id).map_err(Error::from))?;

    if let Some(error) = map.remove("error") {
        return Ok(WsIncoming::Response(WsResponse {
            id,
            outcome: Err(fetch_error_from_value(error)),
        }));
    }

    let result = map
        .remove("result")
        .ok_or_else(|| Error::Serialization("response without result or error".to_string()))?;
    let result: WsResult = serde_json::from_value(result)?;

    Ok(WsIncoming::Response(WsResponse {
        id,
        outcome: Ok(result),
    }))
}

/// Interpret a serialized error payload as an `EdenFetchError`
///
/// `{status, value}` maps directly, `{status, message}` keeps the message as
/// the value, anything else becomes the value of a 500 error.
pub fn fetch_error_from_value(value: Value) -> EdenFetchError {
    if let Value::Object(map) = &value {
        if let Some(status) = map
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
        {
            let inner = map
                .get("value")
                .or_else(|| map.get("message"))
                .cloned()
                .unwrap_or(Value::Null);
            return EdenFetchError::new(status, inner);
        }
    }
    EdenFetchError::new(DEFAULT_ERROR_STATUS, value)
}
