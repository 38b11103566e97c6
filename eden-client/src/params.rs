//! Request parameters and their three-level merge
//!
//! Every request is configured by an [`EdenRequestParams`]. A client holds
//! global params, each terminal link holds its own, and each call passes
//! request params. They merge in that order and later levels win:
//!
//! - scalar settings (`domain`, `method`, `body`, `fetcher`, transformers,
//!   timeout, signal) are replaced when set
//! - `options.params`, `options.query` and `options.headers` are merged key
//!   by key
//! - header initializers and hooks are concatenated, so global ones run first
//!
//! # Examples
//!
//! ```rust
//! use eden_client::EdenRequestParams;
//! use serde_json::json;
//!
//! let global = EdenRequestParams::new()
//!     .with_domain("https://api.example.com")
//!     .with_header("authorization", "Bearer a");
//! let request = EdenRequestParams::new()
//!     .with_header("Authorization", "Bearer b")
//!     .with_query("page", json!(2));
//!
//! let merged = global.merge(&request);
//! assert_eq!(merged.options.header("authorization"), Some("Bearer b"));
//! ```

use crate::fetcher::{Domain, EdenHttpRequest, EdenHttpResponse, Fetcher};
use eden_core::{EdenBody, EdenResult, TransformerInput};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Computes headers from the request being built
pub type HeadersFn = Arc<dyn Fn(&EdenRequestParams) -> Vec<(String, String)> + Send + Sync>;

/// Rewrites the outgoing request just before dispatch
pub type OnRequest = Arc<dyn Fn(&mut EdenHttpRequest) + Send + Sync>;

/// Inspects the raw response; returning a value replaces body parsing
pub type OnResponse = Arc<dyn Fn(&EdenHttpResponse) -> Option<Value> + Send + Sync>;

/// Post-processes the result; returning `None` keeps it unchanged
pub type OnResult = Arc<dyn Fn(&EdenResult) -> Option<EdenResult> + Send + Sync>;

/// One entry of the header resolver chain
#[derive(Clone)]
pub enum HeadersInit {
    Static(Vec<(String, String)>),
    Fn(HeadersFn),
}

impl HeadersInit {
    pub(crate) fn resolve(&self, params: &EdenRequestParams) -> Vec<(String, String)> {
        match self {
            HeadersInit::Static(headers) => headers.clone(),
            HeadersInit::Fn(f) => f(params),
        }
    }
}

impl fmt::Debug for HeadersInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadersInit::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            HeadersInit::Fn(_) => f.write_str("Fn"),
        }
    }
}

/// Path parameters, query and per-request headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Values substituted for `:name` path segments
    pub params: Map<String, Value>,
    pub query: Map<String, Value>,
    /// Lower-cased header names
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn merge(&self, other: &RequestOptions) -> RequestOptions {
        let mut merged = self.clone();
        for (key, value) in &other.params {
            merged.params.insert(key.clone(), value.clone());
        }
        for (key, value) in &other.query {
            merged.query.insert(key.clone(), value.clone());
        }
        for (name, value) in &other.headers {
            set_header(&mut merged.headers, name, value);
        }
        merged
    }
}

/// Insert or replace a lower-cased header
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    let name = name.to_ascii_lowercase();
    match headers.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = value.to_string(),
        None => headers.push((name, value.to_string())),
    }
}

/// Transport options for a single dispatch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub signal: Option<CancellationToken>,
}

/// Configuration of one request at any precedence level
#[derive(Clone, Default)]
pub struct EdenRequestParams {
    pub domain: Option<Domain>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub body: Option<EdenBody>,
    pub options: RequestOptions,
    /// Header resolver chain, applied before `options.headers`
    pub headers: Vec<HeadersInit>,
    pub fetch: FetchOptions,
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub on_request: Vec<OnRequest>,
    pub on_response: Vec<OnResponse>,
    pub on_result: Vec<OnResult>,
    /// Transformer applied to bodies and results
    pub transformer: Option<TransformerInput>,
    /// Registry the transformer id is looked up in
    pub transformers: Option<TransformerInput>,
}

impl EdenRequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` on top of `self`
    pub fn merge(&self, other: &EdenRequestParams) -> EdenRequestParams {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        fn concat<T: Clone>(base: &[T], over: &[T]) -> Vec<T> {
            base.iter().chain(over.iter()).cloned().collect()
        }

        EdenRequestParams {
            domain: pick(&self.domain, &other.domain),
            path: pick(&self.path, &other.path),
            method: pick(&self.method, &other.method),
            body: pick(&self.body, &other.body),
            options: self.options.merge(&other.options),
            headers: concat(&self.headers, &other.headers),
            fetch: FetchOptions {
                timeout: pick(&self.fetch.timeout, &other.fetch.timeout),
                signal: pick(&self.fetch.signal, &other.fetch.signal),
            },
            fetcher: pick(&self.fetcher, &other.fetcher),
            on_request: concat(&self.on_request, &other.on_request),
            on_response: concat(&self.on_response, &other.on_response),
            on_result: concat(&self.on_result, &other.on_result),
            transformer: pick(&self.transformer, &other.transformer),
            transformers: pick(&self.transformers, &other.transformers),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<Domain>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_ascii_uppercase());
        self
    }

    pub fn with_body(mut self, body: impl Into<EdenBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Value for the `:name` path segment
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.params.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.query.insert(name.into(), value.into());
        self
    }

    /// Per-request header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        set_header(&mut self.options.headers, name, value);
        self
    }

    /// Append static headers to the resolver chain
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers.push(HeadersInit::Static(headers));
        self
    }

    /// Append a header function to the resolver chain
    pub fn with_headers_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&EdenRequestParams) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.headers.push(HeadersInit::Fn(Arc::new(f)));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch.timeout = Some(timeout);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.fetch.signal = Some(signal);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut EdenHttpRequest) + Send + Sync + 'static,
    {
        self.on_request.push(Arc::new(f));
        self
    }

    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&EdenHttpResponse) -> Option<Value> + Send + Sync + 'static,
    {
        self.on_response.push(Arc::new(f));
        self
    }

    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&EdenResult) -> Option<EdenResult> + Send + Sync + 'static,
    {
        self.on_result.push(Arc::new(f));
        self
    }

    pub fn with_transformer(mut self, transformer: TransformerInput) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_transformers(mut self, registry: TransformerInput) -> Self {
        self.transformers = Some(registry);
        self
    }

    /// The value sent as operation input over transports without HTTP bodies
    ///
    /// A JSON body wins, then a text body, then the query map.
    pub fn input(&self) -> Value {
        match &self.body {
            Some(EdenBody::Json { value, .. }) => value.clone(),
            Some(EdenBody::Text(text)) => Value::String(text.clone()),
            Some(EdenBody::Form(form)) => eden_core::form::form_to_json(form),
            None if !self.options.query.is_empty() => Value::Object(self.options.query.clone()),
            None => Value::Null,
        }
    }
}

impl fmt::Debug for EdenRequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdenRequestParams")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("options", &self.options)
            .field("headers", &self.headers)
            .field("fetch", &self.fetch)
            .field("hooks", &(self.on_request.len(), self.on_response.len(), self.on_result.len()))
            .field("transformer", &self.transformer)
            .finish()
    }
}
