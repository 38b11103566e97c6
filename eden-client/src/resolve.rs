//! Request resolution
//!
//! [`resolve_eden_request`] turns merged [`EdenRequestParams`] into one
//! transport call and a discriminated [`EdenResult`]. The steps run in a
//! fixed order:
//!
//! 1. substitute `:name` path segments from `options.params`
//! 2. build the query string from `options.query`
//! 3. merge headers: the resolver chain, then `options.headers`, lower-cased
//! 4. encode the body, running it through the transformer if one is active
//! 5. run `on_request` hooks
//! 6. drop any body from GET and HEAD requests
//! 7. dispatch to the in-process handler or the fetcher
//! 8. decode the response by content type, unless an `on_response` hook
//!    supplied the data
//! 9. turn a status of 400 or more into an error
//! 10. deserialize data and error values through the transformer, then run
//!     `on_result` hooks
//!
//! Failures to reach the server become `EdenFetchError(422, cause)`; only
//! cancellation and configuration errors are returned as `Err`.

use crate::fetcher::{default_fetcher, Domain, EdenHttpRequest, EdenHttpResponse, RequestBody};
use crate::params::{set_header, EdenRequestParams};
use crate::response::parse_response;
use bytes::Bytes;
use eden_core::batch::BatchEntry;
use eden_core::form::{files_are_top_level, form_text, strip_file_paths};
use eden_core::transformer::{match_transformer, resolve_transformers, ResolvedTransformer};
use eden_core::{
    EdenBody, EdenData, EdenFetchError, EdenResult, Error, FormData, ResponseInfo, Result,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Header carrying the id of the transformer that serialized the body
pub const TRANSFORMER_ID_HEADER: &str = "transformer-id";
/// Header flagging a transformed body
pub const TRANSFORMED_HEADER: &str = "transformed";

/// A request with every input resolved but no transport encoding yet
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub method: String,
    pub path: String,
    pub query: Map<String, Value>,
    pub headers: Vec<(String, String)>,
    pub body: Option<EdenBody>,
    pub transformer: Option<ResolvedTransformer>,
}

fn is_bodyless(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
}

/// Replace `:name` segments with values from `params`
///
/// Segments without a matching value are left as they are.
pub fn substitute_path(path: &str, params: &Map<String, Value>) -> String {
    path.split('/')
        .map(|segment| {
            segment
                .strip_prefix(':')
                .and_then(|name| params.get(name))
                .and_then(form_text)
                .unwrap_or_else(|| segment.to_string())
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode a query map; arrays repeat their key and `null` is skipped
pub fn query_string(query: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        match value {
            Value::Array(items) => {
                for text in items.iter().filter_map(form_text) {
                    serializer.append_pair(key, &text);
                }
            }
            other => {
                if let Some(text) = form_text(other) {
                    serializer.append_pair(key, &text);
                }
            }
        }
    }
    serializer.finish()
}

/// The transformer in effect, matched against the registry if there is one
pub(crate) fn active_transformer(params: &EdenRequestParams) -> Option<ResolvedTransformer> {
    let transformer = params.transformer.as_ref()?;
    let registry = params
        .transformers
        .as_ref()
        .map(resolve_transformers)
        .unwrap_or_default();
    match_transformer(&registry, transformer)
}

/// Resolve path, headers, transformer and body
pub(crate) fn prepare(params: &EdenRequestParams) -> Result<PreparedRequest> {
    let method = params
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let path = substitute_path(params.path.as_deref().unwrap_or("/"), &params.options.params);

    let mut headers = Vec::new();
    for init in &params.headers {
        for (name, value) in init.resolve(params) {
            set_header(&mut headers, &name, &value);
        }
    }
    for (name, value) in &params.options.headers {
        set_header(&mut headers, name, value);
    }

    let transformer = active_transformer(params);
    if let Some(transformer) = &transformer {
        set_header(&mut headers, TRANSFORMER_ID_HEADER, &transformer.id);
        set_header(&mut headers, TRANSFORMED_HEADER, "true");
    }

    let body = match (&params.body, &transformer) {
        _ if is_bodyless(&method) => None,
        (Some(EdenBody::Json { value, files }), Some(transformer)) => {
            let mut value = value.clone();
            strip_file_paths(&mut value, files);
            Some(EdenBody::Json {
                value: transformer.serialize(&value)?,
                files: files.clone(),
            })
        }
        (body, _) => body.clone(),
    };

    Ok(PreparedRequest {
        method,
        path,
        query: params.options.query.clone(),
        headers,
        body,
        transformer,
    })
}

impl PreparedRequest {
    /// Build the transport request against `base_url`
    pub(crate) fn into_http_request(self, base_url: &str) -> EdenHttpRequest {
        let mut headers = self.headers;
        let transformed = self.transformer.is_some();
        let body = self
            .body
            .and_then(|body| encode_body(body, transformed, &mut headers));

        let query = query_string(&self.query);
        let separator = if self.path.starts_with('/') { "" } else { "/" };
        let url = if query.is_empty() {
            format!("{}{}{}", base_url, separator, self.path)
        } else {
            format!("{}{}{}?{}", base_url, separator, self.path, query)
        };

        EdenHttpRequest {
            method: self.method,
            url,
            headers,
            body,
        }
    }

    /// Describe this request as one entry of a batch
    pub(crate) fn into_batch_entry(self) -> BatchEntry {
        let headers = self
            .headers
            .into_iter()
            .filter(|(name, _)| {
                name != TRANSFORMER_ID_HEADER && name != TRANSFORMED_HEADER && name != "content-type"
            })
            .collect();
        let body = match self.body {
            Some(EdenBody::Json { mut value, files }) if self.transformer.is_none() => {
                strip_file_paths(&mut value, &files);
                Some(EdenBody::Json { value, files })
            }
            other => other,
        };

        BatchEntry {
            path: self.path,
            method: self.method,
            query: self.query,
            headers,
            body,
            transformer_id: self.transformer.map(|t| t.id),
        }
    }
}

fn set_default_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(n, _)| n == name) {
        headers.push((name.to_string(), value.to_string()));
    }
}

/// Encode a body for the wire, adjusting `content-type`
///
/// Files travel as multipart: a flat form when every file is a top-level
/// field of an untransformed body, otherwise the `body` + `files.*`
/// envelope. Objects and arrays are JSON, other values plain text, and a
/// `null` body is not sent.
fn encode_body(
    body: EdenBody,
    transformed: bool,
    headers: &mut Vec<(String, String)>,
) -> Option<RequestBody> {
    match body {
        EdenBody::Form(form) => {
            headers.retain(|(n, _)| n != "content-type");
            Some(RequestBody::Form(form))
        }
        EdenBody::Text(text) => {
            set_default_header(headers, "content-type", "text/plain");
            Some(RequestBody::Bytes(Bytes::from(text)))
        }
        EdenBody::Json { mut value, files } if !files.is_empty() => {
            headers.retain(|(n, _)| n != "content-type");
            if transformed {
                return Some(RequestBody::Form(FormData::file_envelope(
                    &value.to_string(),
                    &files,
                )));
            }
            strip_file_paths(&mut value, &files);
            let form = if files_are_top_level(&files) {
                FormData::from_json_with_files(&value, &files)
            } else {
                FormData::file_envelope(&value.to_string(), &files)
            };
            Some(RequestBody::Form(form))
        }
        EdenBody::Json { value, .. } => match value {
            Value::Null if !transformed => None,
            Value::Object(_) | Value::Array(_) => {
                set_default_header(headers, "content-type", "application/json");
                Some(RequestBody::Bytes(Bytes::from(value.to_string())))
            }
            _ if transformed => {
                set_default_header(headers, "content-type", "application/json");
                Some(RequestBody::Bytes(Bytes::from(value.to_string())))
            }
            other => {
                set_default_header(headers, "content-type", "text/plain");
                form_text(&other).map(|text| RequestBody::Bytes(Bytes::from(text)))
            }
        },
    }
}

async fn dispatch(
    params: &EdenRequestParams,
    domain: &Domain,
    request: EdenHttpRequest,
) -> Result<EdenHttpResponse> {
    let send = async {
        match domain {
            Domain::Handler(handler) => Ok(handler.handle(request).await),
            Domain::Url(_) => {
                let fetcher = params.fetcher.clone().unwrap_or_else(default_fetcher);
                fetcher.fetch(request).await
            }
        }
    };

    let timed = async {
        match params.fetch.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, send).await {
                Ok(response) => response,
                Err(_) => Err(Error::Timeout),
            },
            None => send.await,
        }
    };

    match &params.fetch.signal {
        Some(signal) if signal.is_cancelled() => Err(Error::Aborted),
        Some(signal) => {
            tokio::select! {
                _ = signal.cancelled() => Err(Error::Aborted),
                response = timed => response,
            }
        }
        None => timed.await,
    }
}

fn data_value(data: EdenData) -> Value {
    match data {
        EdenData::Json(value) => value,
        EdenData::Binary(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        EdenData::Stream(_) => Value::Null,
    }
}

/// Run the transformer and `on_result` hooks over a finished result
pub(crate) fn finish_result(
    params: &EdenRequestParams,
    transformer: Option<&ResolvedTransformer>,
    mut result: EdenResult,
) -> EdenResult {
    if let Some(transformer) = transformer {
        if let Some(error) = &mut result.error {
            match transformer.deserialize(&error.value) {
                Ok(value) => error.value = value,
                Err(e) => debug!(error = %e, "Keeping untransformed error value"),
            }
        } else if let EdenData::Json(value) = &result.data {
            match transformer.deserialize(value) {
                Ok(value) => result.data = EdenData::Json(value),
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize response data");
                    result.data = EdenData::Json(Value::Null);
                    result.error = Some(EdenFetchError::transport(e));
                }
            }
        }
    }

    for hook in &params.on_result {
        if let Some(replaced) = hook(&result) {
            result = replaced;
        }
    }
    result
}

/// Perform one request and return its discriminated result
///
/// # Errors
///
/// `Error::Aborted` when the signal fires, `Error::Config` when the request
/// has no domain. Every other failure is reported in `EdenResult::error`.
#[tracing::instrument(skip(params), fields(path = params.path.as_deref().unwrap_or("/")))]
pub async fn resolve_eden_request(params: EdenRequestParams) -> Result<EdenResult> {
    let domain = params
        .domain
        .clone()
        .ok_or_else(|| Error::Config("request has no domain".to_string()))?;

    let prepared = match prepare(&params) {
        Ok(prepared) => prepared,
        Err(e @ Error::Config(_)) => return Err(e),
        Err(e) => {
            return Ok(finish_result(
                &params,
                None,
                EdenResult::err(EdenFetchError::transport(e)),
            ))
        }
    };
    let transformer = prepared.transformer.clone();

    let mut request = prepared.into_http_request(domain.base_url());
    for hook in &params.on_request {
        hook(&mut request);
    }
    if is_bodyless(&request.method) {
        request.body = None;
    }

    debug!(method = %request.method, url = %request.url, "Dispatching request");

    let response = match dispatch(&params, &domain, request).await {
        Ok(response) => response,
        Err(e @ (Error::Aborted | Error::Config(_))) => return Err(e),
        Err(Error::Fetch(error)) => {
            return Ok(finish_result(&params, transformer.as_ref(), EdenResult::err(error)))
        }
        Err(e) => {
            warn!(error = %e, "Request failed before a response arrived");
            return Ok(finish_result(
                &params,
                None,
                EdenResult::err(EdenFetchError::transport(e)),
            ));
        }
    };

    let status = response.status;
    let info = ResponseInfo {
        status,
        headers: response.headers.clone(),
    };

    let data = match params.on_response.iter().find_map(|hook| hook(&response)) {
        Some(value) => Ok(EdenData::Json(value)),
        None => parse_response(response).await,
    };

    let result = match data {
        Ok(data) if status >= 400 => EdenResult::err(EdenFetchError::new(status, data_value(data))),
        Ok(data) => EdenResult::ok(data),
        Err(e) => EdenResult::err(EdenFetchError::transport(e)),
    };

    debug!(status, ok = result.is_ok(), "Request resolved");
    Ok(finish_result(
        &params,
        transformer.as_ref(),
        result.with_response(info),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{EdenHandler, ResponseBody};
    use async_trait::async_trait;
    use eden_core::{EdenFile, FnTransformer, TransformerInput};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Records requests and answers with a fixed response
    struct Recorder {
        seen: Mutex<Vec<EdenHttpRequest>>,
        respond: Box<dyn Fn(&EdenHttpRequest) -> EdenHttpResponse + Send + Sync>,
    }

    impl Recorder {
        fn new(
            respond: impl Fn(&EdenHttpRequest) -> EdenHttpResponse + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn last(&self) -> EdenHttpRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl EdenHandler for Recorder {
        async fn handle(&self, request: EdenHttpRequest) -> EdenHttpResponse {
            let response = (self.respond)(&request);
            self.seen.lock().unwrap().push(request);
            response
        }
    }

    fn params(handler: Arc<Recorder>) -> EdenRequestParams {
        let handler: Arc<dyn EdenHandler> = handler;
        EdenRequestParams::new().with_domain(handler)
    }

    fn ok_json() -> impl Fn(&EdenHttpRequest) -> EdenHttpResponse + Send + Sync {
        |_| EdenHttpResponse::json(200, &json!({"ok": true}))
    }

    #[test]
    fn test_substitute_path() {
        let mut values = Map::new();
        values.insert("id".into(), json!(7));
        values.insert("slug".into(), json!("intro"));
        assert_eq!(substitute_path("/posts/:id/:slug/:missing", &values), "/posts/7/intro/:missing");
    }

    #[test]
    fn test_query_string_repeats_arrays() {
        let mut query = Map::new();
        query.insert("tag".into(), json!(["a", "b"]));
        query.insert("skip".into(), Value::Null);
        query.insert("n".into(), json!(1));
        assert_eq!(query_string(&query), "tag=a&tag=b&n=1");
    }

    #[tokio::test]
    async fn test_builds_url_and_headers() {
        let recorder = Recorder::new(ok_json());
        let params = params(Arc::clone(&recorder))
            .with_path("/users/:id")
            .with_param("id", 3)
            .with_query("expand", "posts")
            .with_headers(vec![("X-Global".into(), "g".into()), ("x-over".into(), "g".into())])
            .with_header("X-Over", "r");

        let result = resolve_eden_request(params).await.unwrap();

        assert_eq!(result.json(), Some(&json!({"ok": true})));
        let request = recorder.last();
        assert_eq!(request.url, "http://localhost/users/3?expand=posts");
        assert_eq!(request.header("x-global"), Some("g"));
        assert_eq!(request.header("x-over"), Some("r"));
    }

    #[tokio::test]
    async fn test_get_never_carries_body() {
        let recorder = Recorder::new(ok_json());
        let params = params(Arc::clone(&recorder))
            .with_body(json!({"a": 1}))
            .on_request(|request| {
                request.body = Some(RequestBody::Bytes(Bytes::from_static(b"sneaky")));
            });

        resolve_eden_request(params).await.unwrap();
        assert_eq!(recorder.last().body, None);
    }

    #[tokio::test]
    async fn test_body_encodings() {
        let recorder = Recorder::new(ok_json());
        let base = params(Arc::clone(&recorder)).with_method("POST");

        resolve_eden_request(base.clone().with_body(json!({"a": 1}))).await.unwrap();
        let request = recorder.last();
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, Some(RequestBody::Bytes(Bytes::from(r#"{"a":1}"#))));

        resolve_eden_request(base.clone().with_body(json!(5))).await.unwrap();
        let request = recorder.last();
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.body, Some(RequestBody::Bytes(Bytes::from("5"))));

        resolve_eden_request(base.clone().with_body(Value::Null)).await.unwrap();
        assert_eq!(recorder.last().body, None);
    }

    #[tokio::test]
    async fn test_top_level_files_become_flat_form() {
        let recorder = Recorder::new(ok_json());
        let body = EdenBody::json(json!({"title": "cv", "avatar": null}))
            .with_file("avatar", EdenFile::new("me.png", "png"));
        let params = params(Arc::clone(&recorder)).with_method("POST").with_body(body);

        resolve_eden_request(params).await.unwrap();

        let Some(RequestBody::Form(form)) = recorder.last().body else {
            panic!("expected form body");
        };
        assert_eq!(form.get("title").and_then(|v| v.as_text()), Some("cv"));
        assert_eq!(form.get("avatar").and_then(|v| v.as_file()).map(|f| f.name.as_str()), Some("me.png"));
        assert!(recorder.last().header("content-type").is_none());
    }

    #[tokio::test]
    async fn test_nested_files_use_envelope() {
        let recorder = Recorder::new(ok_json());
        let body = EdenBody::json(json!({"profile": {"avatar": null, "bio": "hi"}}))
            .with_file("profile.avatar", EdenFile::new("me.png", "png"));
        let params = params(Arc::clone(&recorder)).with_method("POST").with_body(body);

        resolve_eden_request(params).await.unwrap();

        let Some(RequestBody::Form(form)) = recorder.last().body else {
            panic!("expected form body");
        };
        let body: Value = serde_json::from_str(form.get("body").and_then(|v| v.as_text()).unwrap()).unwrap();
        assert_eq!(body, json!({"profile": {"bio": "hi"}}));
        assert_eq!(form.get("files.path").and_then(|v| v.as_text()), Some("profile.avatar"));
        assert!(form.get("files.file").and_then(|v| v.as_file()).is_some());
    }

    #[tokio::test]
    async fn test_transformer_round_trip() {
        let recorder = Recorder::new(|request| {
            let body: Value = match &request.body {
                Some(RequestBody::Bytes(bytes)) => serde_json::from_slice(bytes).unwrap(),
                _ => Value::Null,
            };
            EdenHttpResponse::json(200, &json!({"wrapped": body["wrapped"]}))
        });
        let wrap = FnTransformer::new(
            |v| Ok(json!({"wrapped": v})),
            |v| Ok(v.get("wrapped").cloned().unwrap_or(Value::Null)),
        )
        .with_id("wrap");
        let params = params(Arc::clone(&recorder))
            .with_method("POST")
            .with_body(json!({"n": 1}))
            .with_transformer(TransformerInput::single(Arc::new(wrap)));

        let result = resolve_eden_request(params).await.unwrap();

        let request = recorder.last();
        assert_eq!(request.header("transformer-id"), Some("wrap"));
        assert_eq!(request.header("transformed"), Some("true"));
        assert_eq!(result.json(), Some(&json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_error_status_becomes_fetch_error() {
        let recorder = Recorder::new(|_| EdenHttpResponse::json(404, &json!({"message": "nope"})));
        let result = resolve_eden_request(params(recorder)).await.unwrap();

        let error = result.error.unwrap();
        assert_eq!(error.status, 404);
        assert_eq!(error.value, json!({"message": "nope"}));
        assert_eq!(result.response.map(|r| r.status), Some(404));
    }

    #[tokio::test]
    async fn test_strict_transformer_keeps_error_status() {
        let recorder = Recorder::new(|_| EdenHttpResponse::json(404, &json!({"message": "nope"})));
        let strict = FnTransformer::new(
            |v| Ok(v.clone()),
            |v| {
                if v.is_object() {
                    Ok(v.clone())
                } else {
                    Err(Error::Transformer("expected object".to_string()))
                }
            },
        )
        .with_id("strict");
        let params = params(recorder).with_transformer(TransformerInput::single(Arc::new(strict)));

        let result = resolve_eden_request(params).await.unwrap();

        let error = result.error.unwrap();
        assert_eq!(error.status, 404);
        assert_eq!(error.value, json!({"message": "nope"}));
    }

    #[tokio::test]
    async fn test_transport_failure_is_422() {
        let params = EdenRequestParams::new()
            .with_domain("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(5));
        let result = resolve_eden_request(params).await.unwrap();
        assert_eq!(result.error.map(|e| e.status), Some(422));
    }

    #[tokio::test]
    async fn test_aborted_signal_rejects() {
        let recorder = Recorder::new(ok_json());
        let signal = CancellationToken::new();
        signal.cancel();
        let result = resolve_eden_request(params(recorder).with_signal(signal)).await;
        assert_eq!(result, Err(Error::Aborted));
    }

    #[tokio::test]
    async fn test_missing_domain_is_config_error() {
        let result = resolve_eden_request(EdenRequestParams::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_hooks() {
        let recorder = Recorder::new(|_| {
            EdenHttpResponse::new(200, ResponseBody::Bytes(Bytes::from_static(b"raw")))
        });
        let params = params(recorder)
            .on_response(|response| Some(json!({"status": response.status})))
            .on_result(|_| None)
            .on_result(|result| {
                let mut result = result.clone();
                result.data = EdenData::Json(json!("replaced"));
                Some(result)
            });

        let result = resolve_eden_request(params).await.unwrap();
        assert_eq!(result.json(), Some(&json!("replaced")));
    }
}
