//! Logical operations flowing through the link chain

use crate::params::EdenRequestParams;
use eden_core::OperationType;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One logical call issued by the client
///
/// The id stays fixed for the lifetime of the call. `context` is shared
/// scratch space: clones of an operation see each other's writes, so links
/// can enrich it on the way down and read it on the way up.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: u64,
    pub op_type: OperationType,
    pub path: String,
    /// Request-level params
    pub params: EdenRequestParams,
    /// Client-level params
    pub global: Arc<EdenRequestParams>,
    pub context: Arc<Mutex<Map<String, Value>>>,
    pub signal: Option<CancellationToken>,
    /// Resume token of a subscription, set when a link retries it
    pub last_event_id: Option<String>,
}

impl Operation {
    pub fn new(id: u64, op_type: OperationType, path: impl Into<String>) -> Self {
        Self {
            id,
            op_type,
            path: path.into(),
            params: EdenRequestParams::default(),
            global: Arc::new(EdenRequestParams::default()),
            context: Arc::new(Mutex::new(Map::new())),
            signal: None,
            last_event_id: None,
        }
    }

    pub fn with_params(mut self, params: EdenRequestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_global(mut self, global: Arc<EdenRequestParams>) -> Self {
        self.global = global;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Merge global, `link` and request params into what the resolver sees
    ///
    /// The operation path and type fill in `path` and `method` when the
    /// request does not set them, and the operation's signal is used unless
    /// the request carries its own.
    pub fn resolved_params(&self, link: &EdenRequestParams) -> EdenRequestParams {
        let mut params = self.global.merge(link).merge(&self.params);
        if self.params.path.is_none() {
            params.path = Some(self.path.clone());
        }
        if params.method.is_none() {
            params.method = Some(self.op_type.default_method().to_string());
        }
        if params.fetch.signal.is_none() {
            params.fetch.signal = self.signal.clone();
        }
        params
    }

    pub fn context_value(&self, key: &str) -> Option<Value> {
        eden_core::observable::lock(&self.context).get(key).cloned()
    }

    pub fn set_context(&self, key: impl Into<String>, value: Value) {
        eden_core::observable::lock(&self.context).insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolved_params_defaults() {
        let op = Operation::new(1, OperationType::Mutation, "/users");
        let params = op.resolved_params(&EdenRequestParams::new());
        assert_eq!(params.path.as_deref(), Some("/users"));
        assert_eq!(params.method.as_deref(), Some("POST"));
    }

    #[test]
    fn test_request_overrides_link_and_global() {
        let global = EdenRequestParams::new().with_domain("http://global").with_method("PATCH");
        let link = EdenRequestParams::new().with_domain("http://link");
        let op = Operation::new(2, OperationType::Query, "/a")
            .with_global(Arc::new(global))
            .with_params(EdenRequestParams::new().with_method("DELETE"));

        let params = op.resolved_params(&link);
        assert_eq!(params.domain.map(|d| d.base_url().to_string()).as_deref(), Some("http://link"));
        assert_eq!(params.method.as_deref(), Some("DELETE"));
    }

    #[test]
    fn test_context_is_shared_between_clones() {
        let op = Operation::new(3, OperationType::Query, "/a");
        let copy = op.clone();
        copy.set_context("seen", json!(true));
        assert_eq!(op.context_value("seen"), Some(json!(true)));
    }
}
