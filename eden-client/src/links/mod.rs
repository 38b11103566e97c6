//! The link chain
//!
//! A link is a function from a [`LinkContext`] to an observable of result
//! envelopes. Middleware links call [`Next::call`] to reach the rest of the
//! chain and wrap the observable they get back; terminal links never call
//! it and talk to a transport instead.
//!
//! ```text
//! client -> logger_link -> retry_link -> split_link -+-> ws_link
//!                                                   +-> http_batch_link
//! ```
//!
//! Links run outermost-first on subscribe and values travel back
//! innermost-first. A chain that runs out of links fails the operation with
//! `Error::Config("No more links to execute")`.

mod http;
mod http_batch;
mod logger;
mod retry;
mod split;
mod ws;

pub use http::http_link;
pub use http_batch::{http_batch_link, BatchMethod, HttpBatchLinkOptions};
pub use logger::logger_link;
pub use retry::{retry_link, RetryLinkOptions};
pub use split::split_link;
pub use ws::ws_link;

use crate::operation::Operation;
use eden_core::{EdenResult, Error, Observable, OperationResultEnvelope, Observer};
use std::sync::Arc;

/// Observable every link returns
pub type OperationObservable = Observable<OperationResultEnvelope, Error>;

/// A stage of the chain
pub type OperationLink = Arc<dyn Fn(LinkContext) -> OperationObservable + Send + Sync>;

/// What a link is called with
pub struct LinkContext {
    pub op: Operation,
    pub next: Next,
}

/// Continuation to the rest of the chain
#[derive(Clone)]
pub struct Next {
    links: Arc<[OperationLink]>,
    index: usize,
}

impl Next {
    /// Run the remaining links for `op`
    pub fn call(&self, op: Operation) -> OperationObservable {
        execute(&self.links, self.index, op)
    }
}

fn execute(links: &Arc<[OperationLink]>, index: usize, op: Operation) -> OperationObservable {
    match links.get(index) {
        Some(link) => link(LinkContext {
            op,
            next: Next {
                links: Arc::clone(links),
                index: index + 1,
            },
        }),
        None => Observable::throw(Error::Config("No more links to execute".to_string())),
    }
}

/// Build the observable for `op` running through `links`
pub fn create_chain(links: Arc<[OperationLink]>, op: Operation) -> OperationObservable {
    execute(&links, 0, op)
}

/// Deliver a single resolved result to a terminal link's observer
///
/// Successful results are emitted and completed; failed ones become
/// `Error::Fetch` so middleware can react to them.
pub(crate) fn emit_result(observer: &Observer<OperationResultEnvelope, Error>, result: EdenResult) {
    match result.error.clone() {
        Some(error) => observer.error(Error::Fetch(error)),
        None => {
            observer.next(OperationResultEnvelope::data(result));
            observer.complete();
        }
    }
}

/// Spawn `future` on the current runtime, failing `observer` if there is none
pub(crate) fn spawn_on_runtime<F>(
    observer: &Observer<OperationResultEnvelope, Error>,
    future: F,
) -> Option<tokio::task::JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            observer.error(Error::Config(
                "operations must be started inside a tokio runtime".to_string(),
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eden_core::{OperationType, PartialObserver, Teardown};
    use serde_json::json;
    use std::sync::Mutex;

    fn terminal(value: i64) -> OperationLink {
        Arc::new(move |_ctx: LinkContext| {
            Observable::new(move |observer| {
                observer.next(OperationResultEnvelope::data(EdenResult::ok(json!(value))));
                observer.complete();
                Teardown::None
            })
        })
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> OperationLink {
        Arc::new(move |ctx: LinkContext| {
            log.lock().unwrap().push(format!("{}:{}", name, ctx.op.id));
            ctx.next.call(ctx.op)
        })
    }

    fn collect(observable: OperationObservable) -> Arc<Mutex<Vec<Result<OperationResultEnvelope, Error>>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (on_next, on_error) = (Arc::clone(&events), Arc::clone(&events));
        observable.subscribe(
            PartialObserver::new()
                .next(move |v| on_next.lock().unwrap().push(Ok(v)))
                .error(move |e| on_error.lock().unwrap().push(Err(e))),
        );
        events
    }

    #[test]
    fn test_links_run_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let links: Arc<[OperationLink]> = Arc::from(vec![
            recording("outer", Arc::clone(&log)),
            recording("inner", Arc::clone(&log)),
            terminal(1),
        ]);

        let events = collect(create_chain(links, Operation::new(9, OperationType::Query, "/")));

        assert_eq!(*log.lock().unwrap(), vec!["outer:9", "inner:9"]);
        assert_eq!(
            events.lock().unwrap()[0],
            Ok(OperationResultEnvelope::data(EdenResult::ok(json!(1))))
        );
    }

    #[test]
    fn test_missing_terminal_link() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let links: Arc<[OperationLink]> = Arc::from(vec![recording("only", log)]);

        let events = collect(create_chain(links, Operation::new(1, OperationType::Query, "/")));

        assert_eq!(
            events.lock().unwrap()[0],
            Err(Error::Config("No more links to execute".to_string()))
        );
    }

    #[test]
    fn test_short_circuit_without_next() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let links: Arc<[OperationLink]> = Arc::from(vec![terminal(7), recording("never", Arc::clone(&log))]);

        let events = collect(create_chain(links, Operation::new(1, OperationType::Query, "/")));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
