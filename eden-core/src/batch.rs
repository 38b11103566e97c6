//! Batch wire format
//!
//! A batch carries `n` requests in one physical HTTP request. Every
//! per-request key is prefixed with the request's index in the batch.
//!
//! # GET
//!
//! Query parameters `{i}.path`, `{i}.method`, `{i}.query.{name}` and
//! `{i}.transformer-id`.
//!
//! # POST
//!
//! Multipart fields `{i}.path`, `{i}.method`, `{i}.query.{name}`,
//! `{i}.body_type` (`json` or `formdata`), `{i}.body` (JSON text),
//! `{i}.files.path` / `{i}.files.file` pairs for files hoisted out of a JSON
//! body, `{i}.body.{field}` for form bodies, and `{i}.transformer-id` /
//! `{i}.transformer` for transformed bodies.
//!
//! # Headers
//!
//! A header with the same value in every request is sent once under its own
//! name. Any other header is sent as `{i}.{name}` for each request that has
//! it. Decoding applies unprefixed headers and query parameters to every
//! request.
//!
//! # Response
//!
//! A JSON array with one `{data, error, status}` object per request, in
//! request order.

use crate::error::{EdenFetchError, Error, Result};
use crate::form::{form_text, EdenBody, EdenFile, FormData, FormValue};
use crate::types::{EdenData, EdenResult};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Headers that describe the physical request and never apply per entry
const TRANSPORT_HEADERS: &[&str] = &["content-type", "content-length", "host", "transfer-encoding"];

/// One request inside a batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchEntry {
    pub path: String,
    pub method: String,
    pub query: Map<String, Value>,
    /// Lower-cased header names
    pub headers: Vec<(String, String)>,
    pub body: Option<EdenBody>,
    /// Id of the transformer that serialized `body`
    pub transformer_id: Option<String>,
}

impl BatchEntry {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Physical request parts of an encoded batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedBatch {
    /// Query string pairs (GET) or empty (POST)
    pub query: Vec<(String, String)>,
    /// Real HTTP headers
    pub headers: Vec<(String, String)>,
    /// Multipart body (POST)
    pub form: Option<FormData>,
}

impl EncodedBatch {
    /// `application/x-www-form-urlencoded` query string
    pub fn query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish()
    }
}

fn query_pairs(prefix: &str, query: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in query {
        let name = format!("{}query.{}", prefix, key);
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = form_text(item) {
                        out.push((name.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = form_text(other) {
                    out.push((name, text));
                }
            }
        }
    }
}

fn collapse_headers(entries: &[BatchEntry]) -> Vec<(String, String)> {
    let mut names: Vec<&str> = Vec::new();
    for entry in entries {
        for (name, _) in &entry.headers {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
    }

    let mut headers = Vec::new();
    for name in names {
        let values: Vec<Option<&str>> = entries.iter().map(|e| e.header(name)).collect();
        let shared = match values.first() {
            Some(Some(first)) => values.iter().all(|v| *v == Some(*first)).then_some(*first),
            _ => None,
        };
        match shared {
            Some(value) => headers.push((name.to_string(), value.to_string())),
            None => {
                for (index, value) in values.iter().enumerate() {
                    if let Some(value) = value {
                        headers.push((format!("{}.{}", index, name), value.to_string()));
                    }
                }
            }
        }
    }
    headers
}

/// Encode a GET batch as query parameters plus headers
pub fn encode_batch_query(entries: &[BatchEntry]) -> EncodedBatch {
    let mut query = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{}.", index);
        query.push((format!("{}path", prefix), entry.path.clone()));
        query.push((format!("{}method", prefix), entry.method.clone()));
        query_pairs(&prefix, &entry.query, &mut query);
        if let Some(id) = &entry.transformer_id {
            query.push((format!("{}transformer-id", prefix), id.clone()));
        }
    }

    EncodedBatch {
        query,
        headers: collapse_headers(entries),
        form: None,
    }
}

/// Encode a POST batch as a multipart form plus headers
pub fn encode_batch_form(entries: &[BatchEntry]) -> EncodedBatch {
    let mut form = FormData::new();
    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{}.", index);
        form.append_text(format!("{}method", prefix), entry.method.clone());
        form.append_text(format!("{}path", prefix), entry.path.clone());

        let mut query = Vec::new();
        query_pairs(&prefix, &entry.query, &mut query);
        for (name, value) in query {
            form.append_text(name, value);
        }

        match &entry.body {
            Some(EdenBody::Json { value, files }) => {
                form.append_text(format!("{}body_type", prefix), "json");
                form.append_text(format!("{}body", prefix), value.to_string());
                for (path, file) in files {
                    form.append_text(format!("{}files.path", prefix), path.clone());
                    form.append_file(format!("{}files.file", prefix), file.clone());
                }
            }
            Some(EdenBody::Text(text)) => {
                form.append_text(format!("{}body_type", prefix), "json");
                form.append_text(format!("{}body", prefix), Value::String(text.clone()).to_string());
            }
            Some(EdenBody::Form(body)) => {
                form.append_text(format!("{}body_type", prefix), "formdata");
                for (name, value) in body.entries() {
                    form.append(format!("{}body.{}", prefix, name), value.clone());
                }
            }
            None => {}
        }

        if let Some(id) = &entry.transformer_id {
            form.append_text(format!("{}transformer-id", prefix), id.clone());
            form.append_text(format!("{}transformer", prefix), "true");
        }
    }

    EncodedBatch {
        query: Vec::new(),
        headers: collapse_headers(entries),
        form: Some(form),
    }
}

/// Split `"{index}.{rest}"` into its parts
fn indexed(key: &str) -> Option<(usize, &str)> {
    let (index, rest) = key.split_once('.')?;
    let index = index.parse::<usize>().ok()?;
    Some((index, rest))
}

#[derive(Default)]
struct PartialEntry {
    path: Option<String>,
    method: Option<String>,
    query: Map<String, Value>,
    body_type: Option<String>,
    body: Option<String>,
    file_paths: Vec<String>,
    files: Vec<EdenFile>,
    form_body: FormData,
    transformer_id: Option<String>,
}

fn push_query(query: &mut Map<String, Value>, name: &str, value: &str) {
    crate::form::insert_repeated(query, name, Value::String(value.to_string()));
}

fn finish(
    partials: BTreeMap<usize, PartialEntry>,
    headers: &[(String, String)],
    global_query: &Map<String, Value>,
    default_method: &str,
) -> Result<Vec<BatchEntry>> {
    if let Some(missing) = (0..partials.len()).find(|i| !partials.contains_key(i)) {
        return Err(Error::Serialization(format!(
            "batch entry {} has no path",
            missing
        )));
    }
    let mut entries = Vec::new();

    let mut global_headers = Vec::new();
    let mut indexed_headers: BTreeMap<usize, Vec<(String, String)>> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        match indexed(&name) {
            Some((index, header)) => indexed_headers
                .entry(index)
                .or_default()
                .push((header.to_string(), value.clone())),
            None if TRANSPORT_HEADERS.contains(&name.as_str()) => {}
            None => global_headers.push((name, value.clone())),
        }
    }

    for (index, partial) in partials {
        let path = partial
            .path
            .ok_or_else(|| Error::Serialization(format!("batch entry {} has no path", index)))?;

        let mut query = global_query.clone();
        query.extend(partial.query);

        let mut entry_headers = global_headers.clone();
        let own = indexed_headers.remove(&index).unwrap_or_default();
        entry_headers.retain(|(name, _)| !own.iter().any(|(n, _)| n == name));
        entry_headers.extend(own);

        let body = match partial.body_type.as_deref() {
            Some("formdata") => Some(EdenBody::Form(partial.form_body)),
            Some("json") | None => match partial.body {
                Some(text) => {
                    let value: Value = serde_json::from_str(&text)?;
                    if partial.file_paths.len() != partial.files.len() {
                        return Err(Error::Serialization(format!(
                            "batch entry {} has {} file paths but {} files",
                            index,
                            partial.file_paths.len(),
                            partial.files.len()
                        )));
                    }
                    Some(EdenBody::Json {
                        value,
                        files: partial.file_paths.into_iter().zip(partial.files).collect(),
                    })
                }
                None => None,
            },
            Some(other) => {
                return Err(Error::Serialization(format!(
                    "unknown body_type {:?} in batch entry {}",
                    other, index
                )))
            }
        };

        entries.push(BatchEntry {
            path,
            method: partial
                .method
                .unwrap_or_else(|| default_method.to_string()),
            query,
            headers: entry_headers,
            body,
            transformer_id: partial.transformer_id,
        });
    }

    Ok(entries)
}

/// Rebuild the entries of a GET batch
pub fn decode_batch_query(
    query: &[(String, String)],
    headers: &[(String, String)],
) -> Result<Vec<BatchEntry>> {
    let mut partials: BTreeMap<usize, PartialEntry> = BTreeMap::new();
    let mut global_query = Map::new();

    for (key, value) in query {
        match indexed(key) {
            Some((index, field)) => {
                let partial = partials.entry(index).or_default();
                match field {
                    "path" => partial.path = Some(value.clone()),
                    "method" => partial.method = Some(value.to_ascii_uppercase()),
                    "transformer-id" => partial.transformer_id = Some(value.clone()),
                    other => {
                        if let Some(name) = other.strip_prefix("query.") {
                            push_query(&mut partial.query, name, value);
                        }
                    }
                }
            }
            None => push_query(&mut global_query, key, value),
        }
    }

    finish(partials, headers, &global_query, "GET")
}

/// Rebuild the entries of a POST batch
pub fn decode_batch_form(form: &FormData, headers: &[(String, String)]) -> Result<Vec<BatchEntry>> {
    let mut partials: BTreeMap<usize, PartialEntry> = BTreeMap::new();
    let mut global_query = Map::new();

    for (key, value) in form.entries() {
        let Some((index, field)) = indexed(key) else {
            if let (Some(name), FormValue::Text(text)) = (key.strip_prefix("query."), value) {
                push_query(&mut global_query, name, text);
            }
            continue;
        };
        let partial = partials.entry(index).or_default();

        if let Some(name) = field.strip_prefix("body.") {
            partial.form_body.append(name, value.clone());
            continue;
        }

        match (field, value) {
            ("files.file", FormValue::File(file)) => partial.files.push(file.clone()),
            (_, FormValue::File(_)) => {
                return Err(Error::Serialization(format!(
                    "unexpected file in batch field {}",
                    key
                )))
            }
            (field, FormValue::Text(text)) => match field {
                "path" => partial.path = Some(text.clone()),
                "method" => partial.method = Some(text.to_ascii_uppercase()),
                "body_type" => partial.body_type = Some(text.clone()),
                "body" => partial.body = Some(text.clone()),
                "files.path" => partial.file_paths.push(text.clone()),
                "transformer-id" => partial.transformer_id = Some(text.clone()),
                other => {
                    if let Some(name) = other.strip_prefix("query.") {
                        push_query(&mut partial.query, name, text);
                    }
                }
            },
        }
    }

    finish(partials, headers, &global_query, "POST")
}

/// Serialize per-request results into the batch response array
pub fn encode_batch_response(results: &[EdenResult]) -> Value {
    Value::Array(
        results
            .iter()
            .map(|result| {
                let data = match &result.data {
                    EdenData::Json(value) => value.clone(),
                    EdenData::Binary(bytes) => {
                        Value::String(String::from_utf8_lossy(bytes).into_owned())
                    }
                    EdenData::Stream(_) => Value::Null,
                };
                match &result.error {
                    Some(error) => json!({
                        "data": data,
                        "error": error.value,
                        "status": error.status,
                    }),
                    None => json!({
                        "data": data,
                        "error": null,
                        "status": result.response.as_ref().map(|r| r.status).unwrap_or(200),
                    }),
                }
            })
            .collect(),
    )
}

/// Split a batch response array into per-request results
///
/// # Errors
///
/// Fails if the payload is not an array of `expected` objects.
pub fn decode_batch_response(value: Value, expected: usize) -> Result<Vec<EdenResult>> {
    let Value::Array(items) = value else {
        return Err(Error::Serialization(
            "batch response is not an array".to_string(),
        ));
    };
    if items.len() != expected {
        return Err(Error::Serialization(format!(
            "batch response has {} results for {} requests",
            items.len(),
            expected
        )));
    }

    Ok(items
        .into_iter()
        .map(|item| {
            let status = item
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok());
            let error = item.get("error").cloned().unwrap_or(Value::Null);
            let data = item.get("data").cloned().unwrap_or(Value::Null);
            let failed = !error.is_null() || status.is_some_and(|s| s >= 400);
            if failed {
                EdenResult::err(EdenFetchError::new(status.unwrap_or(500), error))
            } else {
                EdenResult::ok(data)
            }
        })
        .collect())
}
