//! Response body decoding
//!
//! The body is decoded according to its media type:
//!
//! | Content type | Result |
//! |--------------|--------|
//! | `text/event-stream` | [`EdenData::Stream`] of coerced events |
//! | `application/json` | parsed JSON |
//! | `application/octet-stream` | [`EdenData::Binary`] |
//! | `multipart/form-data` | object of fields |
//! | anything else | coerced text |

use crate::fetcher::{EdenHttpResponse, ResponseBody};
use bytes::Bytes;
use eden_core::form::{file_summary, form_to_json, insert_repeated};
use eden_core::{EdenData, EdenFile, EventStream, FormData, FormValue, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Best-effort conversion of text into a JSON value
///
/// Numbers, booleans, `null`, objects and arrays are recognised; anything
/// else stays a string. Empty text becomes `null`.
pub fn coerce(text: &str) -> Value {
    let trimmed = text.trim();
    match trimmed {
        "" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }

    let looks_numeric = trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
        && trimmed.bytes().any(|b| b.is_ascii_digit());
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    if looks_numeric || looks_structured {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::String(text.to_string())
}

/// Decode a complete response body
pub async fn parse_response(response: EdenHttpResponse) -> Result<EdenData> {
    let content_type = response.content_type().unwrap_or_default();
    let boundary = response
        .header("content-type")
        .and_then(multipart_boundary)
        .map(str::to_string);

    match response.body {
        ResponseBody::Form(form) => Ok(EdenData::Json(form_to_json(&form))),
        ResponseBody::Stream(chunks) => {
            if content_type == "text/event-stream" {
                Ok(EdenData::Stream(event_stream(chunks)))
            } else {
                let mut body = Vec::new();
                let mut chunks = chunks;
                while let Some(chunk) = chunks.next().await {
                    body.extend_from_slice(&chunk?);
                }
                decode_bytes(&content_type, boundary.as_deref(), Bytes::from(body))
            }
        }
        ResponseBody::Bytes(bytes) => {
            if content_type == "text/event-stream" {
                let chunks = stream::once(async move { Ok(bytes) }).boxed();
                Ok(EdenData::Stream(event_stream(chunks)))
            } else {
                decode_bytes(&content_type, boundary.as_deref(), bytes)
            }
        }
    }
}

fn decode_bytes(content_type: &str, boundary: Option<&str>, bytes: Bytes) -> Result<EdenData> {
    match content_type {
        "application/json" => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(EdenData::Json(Value::Null));
            }
            Ok(EdenData::Json(serde_json::from_slice(&bytes)?))
        }
        "application/octet-stream" => Ok(EdenData::Binary(bytes)),
        "multipart/form-data" => {
            let form = boundary
                .map(|boundary| parse_multipart(&bytes, boundary))
                .unwrap_or_default();
            Ok(EdenData::Json(multipart_json(&form)))
        }
        _ => Ok(EdenData::Json(coerce(&String::from_utf8_lossy(&bytes)))),
    }
}

/// Text fields coerced, files summarised
fn multipart_json(form: &FormData) -> Value {
    let mut map = Map::new();
    for (name, value) in form.entries() {
        let item = match value {
            FormValue::Text(text) => coerce(text),
            FormValue::File(file) => file_summary(file),
        };
        insert_repeated(&mut map, name, item);
    }
    Value::Object(map)
}

/// `boundary` parameter of a multipart content type
fn multipart_boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.eq_ignore_ascii_case("boundary")
            .then(|| value.trim_matches('"'))
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse a `multipart/form-data` body
///
/// Parts without a `name` are skipped; parts with a `filename` become files.
pub fn parse_multipart(body: &[u8], boundary: &str) -> FormData {
    let mut form = FormData::new();
    let delimiter = format!("--{}", boundary).into_bytes();

    let mut rest = match find(body, &delimiter) {
        Some(start) => &body[start + delimiter.len()..],
        None => return form,
    };

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        let Some(end) = find(rest, &delimiter) else {
            break;
        };
        let part = &rest[..end];
        rest = &rest[end + delimiter.len()..];

        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);
        let Some(split) = find(part, b"\r\n\r\n") else {
            continue;
        };
        let (head, content) = (&part[..split], &part[split + 4..]);
        let head = String::from_utf8_lossy(head);

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;
        for line in head.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            } else if key.trim().eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.trim().split_once('=') {
                        let v = v.trim_matches('"').to_string();
                        match k.trim() {
                            "name" => name = Some(v),
                            "filename" => filename = Some(v),
                            _ => {}
                        }
                    }
                }
            }
        }

        let Some(name) = name else {
            continue;
        };
        match filename {
            Some(filename) => {
                let mut file = EdenFile::new(filename, Bytes::copy_from_slice(content));
                if let Some(content_type) = content_type {
                    file = file.with_content_type(content_type);
                }
                form.append_file(name, file);
            }
            None => form.append_text(name, String::from_utf8_lossy(content).into_owned()),
        }
    }

    form
}

const IGNORED_FIELDS: &[&str] = &["event:", "id:", "retry:"];

struct SseState {
    chunks: BoxStream<'static, Result<Bytes>>,
    buffer: Vec<u8>,
    data: Vec<String>,
    ready: VecDeque<Value>,
    finished: bool,
}

impl SseState {
    fn dispatch(&mut self) {
        if !self.data.is_empty() {
            let joined = self.data.join("\n");
            self.data.clear();
            self.ready.push_back(coerce(&joined));
        }
    }

    fn line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            return;
        }
        // comments and fields other than data
        if line.starts_with(':') || IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) {
            return;
        }
        self.dispatch();
        self.ready.push_back(coerce(line));
    }

    fn drain_lines(&mut self) {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.line(&line);
        }
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.line(&String::from_utf8_lossy(&rest));
        }
        self.dispatch();
        self.finished = true;
    }
}

/// Decode an event-stream body into coerced events
pub fn event_stream(chunks: BoxStream<'static, Result<Bytes>>) -> EventStream {
    let state = SseState {
        chunks,
        buffer: Vec::new(),
        data: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error), state));
                }
                None => state.finish(),
            }
        }
    });

    EventStream::new(events.boxed())
}
