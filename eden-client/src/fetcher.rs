//! HTTP transport abstraction
//!
//! The resolver builds an [`EdenHttpRequest`] and hands it to a [`Fetcher`].
//! The default fetcher is a shared `reqwest` client. A [`Domain::Handler`]
//! skips the network entirely and passes the request to an in-process
//! [`EdenHandler`], which is how tests and same-process servers are wired.

use async_trait::async_trait;
use bytes::Bytes;
use eden_core::{EdenFetchError, Error, FormData, FormValue, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Base URL given to in-process handlers
pub const HANDLER_BASE_URL: &str = "http://localhost";

/// Body of an outgoing request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Encoded bytes; the `content-type` header describes them
    Bytes(Bytes),
    /// Multipart form; the transport sets the boundary
    Form(FormData),
}

/// Transport-level request produced by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct EdenHttpRequest {
    pub method: String,
    pub url: String,
    /// Lower-cased header names
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl EdenHttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a header
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Path and query of the URL
    pub fn path_and_query(&self) -> &str {
        let after_scheme = self
            .url
            .find("://")
            .map(|i| &self.url[i + 3..])
            .unwrap_or(&self.url);
        after_scheme
            .find('/')
            .map(|i| &after_scheme[i..])
            .unwrap_or("/")
    }
}

/// Response body as delivered by the transport
pub enum ResponseBody {
    Bytes(Bytes),
    /// Chunked body, used for event streams
    Stream(BoxStream<'static, Result<Bytes>>),
    /// Form returned directly by an in-process handler
    Form(FormData),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => f.write_str("Stream"),
            ResponseBody::Form(form) => write!(f, "Form({} fields)", form.len()),
        }
    }
}

/// Transport-level response handed back to the resolver
#[derive(Debug)]
pub struct EdenHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl EdenHttpResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// JSON response with `content-type: application/json`
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, ResponseBody::Bytes(Bytes::from(value.to_string())))
            .with_header("content-type", "application/json")
    }

    /// Plain text response
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status, ResponseBody::Bytes(Bytes::from(text.into())))
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Media type of the body without parameters, lower-cased
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or(value)
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Sends requests over the network
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request
    ///
    /// Returning `Err(Error::Fetch(..))` reports an application error as is;
    /// any other error is treated as a transport failure.
    async fn fetch(&self, request: EdenHttpRequest) -> Result<EdenHttpResponse>;
}

/// Serves requests in-process
#[async_trait]
pub trait EdenHandler: Send + Sync {
    async fn handle(&self, request: EdenHttpRequest) -> EdenHttpResponse;
}

/// Where requests are sent
#[derive(Clone)]
pub enum Domain {
    /// Base URL such as `https://api.example.com`
    Url(String),
    /// In-process handler
    Handler(Arc<dyn EdenHandler>),
}

impl Domain {
    /// Base URL requests are built against
    pub fn base_url(&self) -> &str {
        match self {
            Domain::Url(url) => url.trim_end_matches('/'),
            Domain::Handler(_) => HANDLER_BASE_URL,
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Domain::Handler(_) => f.write_str("Handler"),
        }
    }
}

impl From<&str> for Domain {
    fn from(url: &str) -> Self {
        Domain::Url(url.to_string())
    }
}

impl From<String> for Domain {
    fn from(url: String) -> Self {
        Domain::Url(url)
    }
}

impl From<Arc<dyn EdenHandler>> for Domain {
    fn from(handler: Arc<dyn EdenHandler>) -> Self {
        Domain::Handler(handler)
    }
}

/// [`Fetcher`] backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// The process-wide default fetcher
pub fn default_fetcher() -> Arc<dyn Fetcher> {
    static DEFAULT: OnceLock<Arc<ReqwestFetcher>> = OnceLock::new();
    let fetcher = DEFAULT.get_or_init(|| Arc::new(ReqwestFetcher::default()));
    Arc::clone(fetcher) as Arc<dyn Fetcher>
}

fn multipart_form(form: FormData) -> Result<reqwest::multipart::Form> {
    let mut multipart = reqwest::multipart::Form::new();
    for (name, value) in form.into_entries() {
        multipart = match value {
            FormValue::Text(text) => multipart.text(name, text),
            FormValue::File(file) => {
                let mut part =
                    reqwest::multipart::Part::bytes(file.data.to_vec()).file_name(file.name);
                if let Some(content_type) = &file.content_type {
                    part = part
                        .mime_str(content_type)
                        .map_err(|e| Error::Serialization(e.to_string()))?;
                }
                multipart.part(name, part)
            }
        };
    }
    Ok(multipart)
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: EdenHttpRequest) -> Result<EdenHttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Config(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            Some(RequestBody::Form(form)) => builder.multipart(multipart_form(form)?),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| EdenFetchError::transport(e))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let streaming = headers
            .iter()
            .any(|(n, v)| n == "content-type" && v.starts_with("text/event-stream"));

        let body = if streaming {
            ResponseBody::Stream(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(|e| Error::Fetch(EdenFetchError::transport(e))))
                    .boxed(),
            )
        } else {
            ResponseBody::Bytes(
                response
                    .bytes()
                    .await
                    .map_err(|e| EdenFetchError::transport(e))?,
            )
        };

        Ok(EdenHttpResponse {
            status,
            headers,
            body,
        })
    }
}
