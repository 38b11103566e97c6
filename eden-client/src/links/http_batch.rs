use super::{emit_result, LinkContext, OperationLink};
use crate::data_loader::{BatchLoader, DataLoader};
use crate::metrics::ClientMetrics;
use crate::params::{set_header, EdenRequestParams, FetchOptions};
use crate::resolve::{active_transformer, finish_result, prepare, resolve_eden_request};
use eden_core::batch::{decode_batch_response, encode_batch_form, encode_batch_query, BatchEntry};
use eden_core::form::insert_repeated;
use eden_core::{EdenBody, EdenResult, Error, Observable, OperationType, Result, Teardown};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

/// HTTP method used for batched queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMethod {
    /// Indexed query parameters; bodies are dropped
    Get,
    /// Indexed multipart form
    #[default]
    Post,
}

/// Configuration of [`http_batch_link`]
#[derive(Clone)]
pub struct HttpBatchLinkOptions {
    /// Link-level request params
    pub params: EdenRequestParams,
    /// Path of the batch endpoint
    pub endpoint: String,
    /// Method for query batches; mutation batches always use POST
    pub method: BatchMethod,
    /// Largest number of operations per batch
    pub max_items: Option<usize>,
    /// Longest URL a GET batch may produce
    pub max_url_length: Option<usize>,
    pub metrics: Option<Arc<ClientMetrics>>,
}

impl Default for HttpBatchLinkOptions {
    fn default() -> Self {
        Self {
            params: EdenRequestParams::default(),
            endpoint: "/batch".to_string(),
            method: BatchMethod::default(),
            max_items: None,
            max_url_length: None,
            metrics: None,
        }
    }
}

impl HttpBatchLinkOptions {
    pub fn new(params: EdenRequestParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_method(mut self, method: BatchMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_max_url_length(mut self, max_url_length: usize) -> Self {
        self.max_url_length = Some(max_url_length);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Params of the single physical request carrying `batch`
fn combined_params(
    options: &HttpBatchLinkOptions,
    method: BatchMethod,
    batch: &[EdenRequestParams],
) -> Result<EdenRequestParams> {
    let first = batch
        .first()
        .ok_or_else(|| Error::Config("empty batch".to_string()))?;
    let entries = batch
        .iter()
        .map(|params| prepare(params).map(|prepared| prepared.into_batch_entry()))
        .collect::<Result<Vec<BatchEntry>>>()?;

    let mut params = EdenRequestParams {
        domain: first.domain.clone(),
        path: Some(options.endpoint.clone()),
        fetcher: first.fetcher.clone(),
        fetch: FetchOptions {
            timeout: first.fetch.timeout,
            signal: None,
        },
        on_request: options.params.on_request.clone(),
        on_response: options.params.on_response.clone(),
        ..EdenRequestParams::default()
    };

    let encoded = match method {
        BatchMethod::Get => {
            let encoded = encode_batch_query(&entries);
            params.method = Some("GET".to_string());
            for (name, value) in &encoded.query {
                insert_repeated(&mut params.options.query, name, Value::String(value.clone()));
            }
            encoded
        }
        BatchMethod::Post => {
            let mut encoded = encode_batch_form(&entries);
            params.method = Some("POST".to_string());
            params.body = encoded.form.take().map(EdenBody::Form);
            encoded
        }
    };
    for (name, value) in &encoded.headers {
        set_header(&mut params.options.headers, name, value);
    }

    Ok(params)
}

#[derive(Clone)]
struct HttpBatchLoader {
    options: Arc<HttpBatchLinkOptions>,
    method: BatchMethod,
}

impl HttpBatchLoader {
    /// Full URL the batch would be sent to
    fn url(&self, batch: &[EdenRequestParams]) -> Result<String> {
        let params = combined_params(&self.options, self.method, batch)?;
        let domain = params
            .domain
            .clone()
            .ok_or_else(|| Error::Config("request has no domain".to_string()))?;
        Ok(prepare(&params)?.into_http_request(domain.base_url()).url)
    }
}

impl BatchLoader<EdenRequestParams, EdenResult> for HttpBatchLoader {
    fn validate(&self, batch: &[EdenRequestParams]) -> bool {
        if self.options.max_items.is_some_and(|max| batch.len() > max) {
            return false;
        }
        match (self.method, self.options.max_url_length) {
            (BatchMethod::Get, Some(max)) => self.url(batch).is_ok_and(|url| url.len() <= max),
            _ => true,
        }
    }

    fn fetch(&self, batch: Vec<EdenRequestParams>) -> BoxFuture<'static, Result<Vec<EdenResult>>> {
        let this = self.clone();
        async move {
            if let Some(metrics) = &this.options.metrics {
                metrics.record_batch(batch.len() as u64);
            }

            if batch.len() == 1 {
                let single = batch.into_iter().next().unwrap_or_default();
                return Ok(vec![resolve_eden_request(single).await?]);
            }

            let combined = combined_params(&this.options, this.method, &batch)?;
            let result = resolve_eden_request(combined).await?;
            if let Some(error) = result.error {
                return Err(Error::Fetch(error));
            }

            let value = result.data.into_json().unwrap_or_default();
            let results = decode_batch_response(value, batch.len())?;
            Ok(results
                .into_iter()
                .zip(batch.iter())
                .map(|(result, params)| {
                    finish_result(params, active_transformer(params).as_ref(), result)
                })
                .collect())
        }
        .boxed()
    }
}

/// Terminal link coalescing same-tick operations into batch requests
///
/// Queries and mutations are batched separately. A batch holding a single
/// operation is sent as a plain request, and an operation that would push a
/// batch past `max_items` or `max_url_length` starts a new batch.
pub fn http_batch_link(options: HttpBatchLinkOptions) -> OperationLink {
    let options = Arc::new(options);
    let queries = DataLoader::new(HttpBatchLoader {
        options: Arc::clone(&options),
        method: options.method,
    });
    let mutations = DataLoader::new(HttpBatchLoader {
        options: Arc::clone(&options),
        method: BatchMethod::Post,
    });

    Arc::new(move |ctx: LinkContext| {
        let op = ctx.op;
        let loader = match op.op_type {
            OperationType::Query => queries.clone(),
            OperationType::Mutation => mutations.clone(),
            OperationType::Subscription => {
                return Observable::throw(Error::Config(
                    "subscriptions are not supported by the HTTP batch link, use a WebSocket link"
                        .to_string(),
                ))
            }
        };
        let options = Arc::clone(&options);

        Observable::new(move |observer| {
            if tokio::runtime::Handle::try_current().is_err() {
                observer.error(Error::Config(
                    "operations must be started inside a tokio runtime".to_string(),
                ));
                return Teardown::None;
            }

            let params = op.resolved_params(&options.params);
            let signal = params.fetch.signal.clone();
            let handle = loader.load(params);
            let task_observer = observer.clone();

            let task = tokio::spawn(async move {
                let outcome = match signal {
                    Some(signal) => tokio::select! {
                        _ = signal.cancelled() => Err(Error::Aborted),
                        outcome = handle => outcome,
                    },
                    None => handle.await,
                };
                match outcome {
                    Ok(result) => emit_result(&task_observer, result),
                    Err(e) => task_observer.error(e),
                }
            });
            Teardown::new(move || task.abort())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{EdenHandler, EdenHttpRequest, EdenHttpResponse, RequestBody};
    use crate::links::create_chain;
    use crate::operation::Operation;
    use async_trait::async_trait;
    use eden_core::batch::{decode_batch_form, decode_batch_query, encode_batch_response};
    use eden_core::observable::observable_to_future;
    use eden_core::OperationResultEnvelope;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers batch requests by echoing each entry's path
    #[derive(Default)]
    struct BatchServer {
        requests: Mutex<Vec<EdenHttpRequest>>,
    }

    #[async_trait]
    impl EdenHandler for BatchServer {
        async fn handle(&self, request: EdenHttpRequest) -> EdenHttpResponse {
            self.requests.lock().unwrap().push(request.clone());
            let url = url::Url::parse(&request.url).unwrap();
            if url.path() != "/batch" {
                return EdenHttpResponse::json(200, &json!({"path": url.path()}));
            }
            let entries = match &request.body {
                Some(RequestBody::Form(form)) => decode_batch_form(form, &request.headers).unwrap(),
                _ => {
                    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
                    decode_batch_query(&query, &request.headers).unwrap()
                }
            };
            let results: Vec<EdenResult> = entries
                .iter()
                .map(|entry| EdenResult::ok(json!({"path": entry.path})))
                .collect();
            EdenHttpResponse::json(200, &encode_batch_response(&results))
        }
    }

    fn options(server: &Arc<BatchServer>) -> HttpBatchLinkOptions {
        let handler: Arc<dyn EdenHandler> = server.clone();
        HttpBatchLinkOptions::new(EdenRequestParams::new().with_domain(handler))
    }

    fn data(envelope: OperationResultEnvelope) -> Value {
        envelope.as_result().and_then(|r| r.json()).cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_request() {
        let server = Arc::new(BatchServer::default());
        let links: Arc<[OperationLink]> = Arc::from(vec![http_batch_link(options(&server))]);

        let a = observable_to_future(&create_chain(
            Arc::clone(&links),
            Operation::new(1, OperationType::Query, "/a"),
        ));
        let b = observable_to_future(&create_chain(
            Arc::clone(&links),
            Operation::new(2, OperationType::Query, "/b"),
        ));
        let (a, b) = futures::future::join(a, b).await;

        assert_eq!(data(a.unwrap()), json!({"path": "/a"}));
        assert_eq!(data(b.unwrap()), json!({"path": "/b"}));
        assert_eq!(server.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_operation_is_unbatched() {
        let server = Arc::new(BatchServer::default());
        let links: Arc<[OperationLink]> = Arc::from(vec![http_batch_link(options(&server))]);

        let result = observable_to_future(&create_chain(
            links,
            Operation::new(1, OperationType::Query, "/solo"),
        ))
        .await
        .unwrap();

        assert_eq!(data(result), json!({"path": "/solo"}));
        let requests = server.requests.lock().unwrap();
        assert_eq!(requests[0].path_and_query(), "/solo");
    }

    #[test]
    fn test_max_url_length_rejects_oversized_get_batch() {
        let server = Arc::new(BatchServer::default());
        let options = options(&server).with_method(BatchMethod::Get);
        let batch: Vec<EdenRequestParams> = (0..3)
            .map(|i| {
                Operation::new(i, OperationType::Query, format!("/items/{}", i))
                    .resolved_params(&options.params)
            })
            .collect();

        let unlimited = HttpBatchLoader {
            options: Arc::new(options.clone()),
            method: BatchMethod::Get,
        };
        let url = unlimited.url(&batch).unwrap();
        assert!(unlimited.validate(&batch));

        let tight = HttpBatchLoader {
            options: Arc::new(options.clone().with_max_url_length(url.len() - 1)),
            method: BatchMethod::Get,
        };
        assert!(!tight.validate(&batch));

        let exact = HttpBatchLoader {
            options: Arc::new(options.with_max_url_length(url.len())),
            method: BatchMethod::Get,
        };
        assert!(exact.validate(&batch));
    }

    #[test]
    fn test_max_items() {
        let server = Arc::new(BatchServer::default());
        let loader = HttpBatchLoader {
            options: Arc::new(options(&server).with_max_items(2)),
            method: BatchMethod::Post,
        };
        let batch = vec![EdenRequestParams::default(); 3];
        assert!(loader.validate(&batch[..2]));
        assert!(!loader.validate(&batch));
    }

    #[tokio::test]
    async fn test_get_batch_round_trip() {
        let server = Arc::new(BatchServer::default());
        let links: Arc<[OperationLink]> =
            Arc::from(vec![http_batch_link(options(&server).with_method(BatchMethod::Get))]);

        let a = observable_to_future(&create_chain(
            Arc::clone(&links),
            Operation::new(1, OperationType::Query, "/x"),
        ));
        let b = observable_to_future(&create_chain(
            Arc::clone(&links),
            Operation::new(2, OperationType::Query, "/y"),
        ));
        let (a, b) = futures::future::join(a, b).await;

        assert_eq!(data(a.unwrap()), json!({"path": "/x"}));
        assert_eq!(data(b.unwrap()), json!({"path": "/y"}));
        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
    }
}
