use super::{emit_result, spawn_on_runtime, LinkContext, OperationLink};
use crate::params::EdenRequestParams;
use crate::resolve::resolve_eden_request;
use eden_core::{EdenFetchError, Error, Observable, OperationType, Teardown};
use std::sync::Arc;

/// Terminal link performing one HTTP request per operation
///
/// Results with a status outside `200..400` fail the operation with
/// `Error::Fetch`. Subscriptions are rejected with a configuration error.
pub fn http_link(params: EdenRequestParams) -> OperationLink {
    let params = Arc::new(params);

    Arc::new(move |ctx: LinkContext| {
        let op = ctx.op;
        if op.op_type == OperationType::Subscription {
            return Observable::throw(Error::Config(
                "subscriptions are not supported by the HTTP link, use a WebSocket link"
                    .to_string(),
            ));
        }

        let params = Arc::clone(&params);
        Observable::new(move |observer| {
            let resolved = op.resolved_params(&params);
            let task_observer = observer.clone();
            let task = spawn_on_runtime(&observer, async move {
                match resolve_eden_request(resolved).await {
                    Ok(mut result) => {
                        let status = result.response.as_ref().map(|r| r.status);
                        if let Some(status) = status.filter(|s| !(200..400).contains(s)) {
                            if result.error.is_none() {
                                let value = result.data.clone().into_json().unwrap_or_default();
                                result.error = Some(EdenFetchError::new(status, value));
                            }
                        }
                        emit_result(&task_observer, result);
                    }
                    Err(e) => task_observer.error(e),
                }
            });

            match task {
                Some(task) => Teardown::new(move || task.abort()),
                None => Teardown::None,
            }
        })
    })
}
