//! The `EdenClient` facade
//!
//! The client turns a call into an [`Operation`] with a fresh id, runs it
//! through its link chain and adapts the resulting observable:
//!
//! - **query / mutation**: resolve with the first result. Application and
//!   transport failures come back in `EdenResult::error`; configuration
//!   errors, cancellation and closed connections are `Err`.
//! - **subscription**: deliver every envelope to the caller's observer until
//!   the returned [`Subscription`] is unsubscribed.
//!
//! # Cloning
//!
//! `EdenClient` is cheaply cloneable; clones share the link chain and the
//! operation id counter.
//!
//! # Examples
//!
//! ```rust,no_run
//! use eden_client::{http_link, EdenClient, EdenRequestParams, OperationOptions};
//!
//! # async fn example() -> eden_core::Result<()> {
//! let client = EdenClient::new(vec![http_link(
//!     EdenRequestParams::new().with_domain("http://localhost:3000"),
//! )]);
//!
//! let result = client
//!     .query("/users/:id", EdenRequestParams::new().with_param("id", 7), OperationOptions::default())
//!     .await?;
//! println!("{:?}", result.data);
//! # Ok(())
//! # }
//! ```

use crate::client_builder::EdenClientBuilder;
use crate::links::{create_chain, OperationLink, OperationObservable};
use crate::metrics::ClientMetrics;
use crate::operation::Operation;
use crate::params::EdenRequestParams;
use eden_core::observable::{filter, observable_to_future, ObservableError};
use eden_core::{
    EdenResult, Error, OperationResultEnvelope, OperationType, PartialObserver, Result,
    Subscription,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Cancels the call
    pub signal: Option<CancellationToken>,
    /// Initial operation context, visible to every link
    pub context: Map<String, Value>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

struct ClientInner {
    links: Arc<[OperationLink]>,
    global: Arc<EdenRequestParams>,
    next_id: AtomicU64,
    metrics: Option<Arc<ClientMetrics>>,
}

/// Client issuing operations through a chain of links
#[derive(Clone)]
pub struct EdenClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for EdenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdenClient")
            .field("links", &self.inner.links.len())
            .field("global", &self.inner.global)
            .finish()
    }
}

impl EdenClient {
    /// A client running `links` with no global params
    pub fn new(links: Vec<OperationLink>) -> Self {
        Self::from_parts(links, EdenRequestParams::default(), None)
    }

    pub fn builder() -> EdenClientBuilder {
        EdenClientBuilder::new()
    }

    pub(crate) fn from_parts(
        links: Vec<OperationLink>,
        global: EdenRequestParams,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                links: Arc::from(links),
                global: Arc::new(global),
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// Params merged under every operation's own params
    pub fn global_params(&self) -> &EdenRequestParams {
        &self.inner.global
    }

    /// Build an operation and the observable running it through the chain
    ///
    /// Nothing is sent until the observable is subscribed.
    pub fn request(
        &self,
        op_type: OperationType,
        path: impl Into<String>,
        params: EdenRequestParams,
        options: OperationOptions,
    ) -> OperationObservable {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut op = Operation::new(id, op_type, path)
            .with_params(params)
            .with_global(Arc::clone(&self.inner.global));
        op.context = Arc::new(Mutex::new(options.context));
        if let Some(signal) = options.signal {
            op = op.with_signal(signal);
        }
        create_chain(Arc::clone(&self.inner.links), op)
    }

    /// Run a query and resolve with its first result
    ///
    /// # Errors
    ///
    /// `Error::Fetch` is never returned: it lands in `EdenResult::error`.
    /// Other errors, including `Error::Aborted` when `options.signal` fires,
    /// are returned as `Err`.
    #[tracing::instrument(skip(self, params, options))]
    pub async fn query(
        &self,
        path: &str,
        params: EdenRequestParams,
        options: OperationOptions,
    ) -> Result<EdenResult> {
        self.execute(OperationType::Query, path, params, options).await
    }

    /// Run a mutation and resolve with its first result
    ///
    /// Errors as for [`EdenClient::query`].
    #[tracing::instrument(skip(self, params, options))]
    pub async fn mutation(
        &self,
        path: &str,
        params: EdenRequestParams,
        options: OperationOptions,
    ) -> Result<EdenResult> {
        self.execute(OperationType::Mutation, path, params, options).await
    }

    async fn execute(
        &self,
        op_type: OperationType,
        path: &str,
        params: EdenRequestParams,
        options: OperationOptions,
    ) -> Result<EdenResult> {
        let started = Instant::now();
        let signal = options.signal.clone();
        let observable = self.request(op_type, path, params, options).pipe(filter(
            |envelope: &OperationResultEnvelope| matches!(envelope, OperationResultEnvelope::Data { .. }),
        ));
        let first = observable_to_future(&observable);

        let outcome = match signal {
            Some(signal) => tokio::select! {
                _ = signal.cancelled() => Err(ObservableError::Error(Error::Aborted)),
                outcome = first => outcome,
            },
            None => first.await,
        };

        let result = match outcome {
            Ok(OperationResultEnvelope::Data { result, .. }) => Ok(result),
            Ok(_) | Err(ObservableError::Aborted) => Err(Error::Aborted),
            Err(ObservableError::Error(Error::Fetch(error))) => Ok(EdenResult::err(error)),
            Err(ObservableError::Error(error)) => Err(error),
        };

        if let Some(metrics) = &self.inner.metrics {
            let ok = matches!(&result, Ok(r) if r.is_ok());
            metrics.record_operation(op_type, ok, started.elapsed().as_secs_f64());
            if let Err(error) = &result {
                metrics.record_error(error);
            }
        }
        if let Ok(r) = &result {
            if let Some(error) = &r.error {
                tracing::debug!(status = error.status, "Operation returned an error result");
            }
        }
        result
    }

    /// Start a subscription and deliver every envelope to `observer`
    ///
    /// The subscription runs until unsubscribed or until the chain
    /// completes or fails it.
    pub fn subscription(
        &self,
        path: impl Into<String>,
        params: EdenRequestParams,
        observer: PartialObserver<OperationResultEnvelope, Error>,
    ) -> Subscription {
        self.request(OperationType::Subscription, path, params, OperationOptions::default())
            .subscribe(observer)
    }
}
