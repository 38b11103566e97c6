//! Builder for `EdenClient`
//!
//! The `EdenClientBuilder` collects the link chain, the global request
//! params and the observability settings:
//! - Links run in the order they were added
//! - Global params are merged under every operation's own params
//! - Observability initialises OpenTelemetry and enables client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use eden_client::{http_batch_link, logger_link, EdenClientBuilder, EdenRequestParams, HttpBatchLinkOptions};
//!
//! # fn example() -> eden_core::Result<()> {
//! let client = EdenClientBuilder::new()
//!     .link(logger_link())
//!     .link(http_batch_link(HttpBatchLinkOptions::new(
//!         EdenRequestParams::new().with_domain("http://localhost:3000"),
//!     )))
//!     .params(EdenRequestParams::new().with_header("authorization", "Bearer token"))
//!     .with_default_observability()
//!     .service_name("my-app")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::client::EdenClient;
use crate::links::OperationLink;
use crate::metrics::ClientMetrics;
use crate::params::EdenRequestParams;
use eden_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;

/// Builder for configuring and creating an [`EdenClient`]
#[derive(Default)]
pub struct EdenClientBuilder {
    links: Vec<OperationLink>,
    params: EdenRequestParams,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl EdenClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the link chain
    pub fn links(mut self, links: Vec<OperationLink>) -> Self {
        self.links = links;
        self
    }

    /// Append a link to the chain
    pub fn link(mut self, link: OperationLink) -> Self {
        self.links.push(link);
        self
    }

    /// Global params shared by every operation
    pub fn params(mut self, params: EdenRequestParams) -> Self {
        self.params = params;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Record client metrics on `metrics` without initialising observability
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if observability fails to initialise.
    pub fn build(self) -> Result<EdenClient> {
        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }

                eden_core::init_observability(config.clone()).map_err(|e| {
                    Error::Config(format!("Failed to initialize observability: {}", e))
                })?;

                Some(
                    self.metrics
                        .unwrap_or_else(|| Arc::new(ClientMetrics::new(config.service_name.clone()))),
                )
            }
            None => self.metrics,
        };

        tracing::debug!(links = self.links.len(), "Building eden client");
        Ok(EdenClient::from_parts(self.links, self.params, metrics))
    }
}
