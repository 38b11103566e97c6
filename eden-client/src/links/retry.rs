use super::{LinkContext, Next, OperationLink};
use crate::operation::Operation;
use eden_core::observable::lock;
use eden_core::{Error, Observable, Observer, OperationResultEnvelope, PartialObserver, Subscription, Teardown};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Decides whether to retry: `(operation, error, attempts so far)`
pub type RetryFn = Arc<dyn Fn(&Operation, &Error, u32) -> bool + Send + Sync>;

/// Delay before the next attempt, given the attempts so far
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Configuration of [`retry_link`]
#[derive(Clone)]
pub struct RetryLinkOptions {
    pub retry: RetryFn,
    pub retry_delay: Option<RetryDelayFn>,
}

impl RetryLinkOptions {
    pub fn new<F>(retry: F) -> Self
    where
        F: Fn(&Operation, &Error, u32) -> bool + Send + Sync + 'static,
    {
        Self {
            retry: Arc::new(retry),
            retry_delay: None,
        }
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.retry_delay = Some(Arc::new(delay));
        self
    }
}

struct RetryState {
    /// Attempt whose subscription `current` holds
    attempt: u32,
    current: Option<Subscription>,
    timer: Option<JoinHandle<()>>,
    last_event_id: Option<String>,
    closed: bool,
}

struct RetryRun {
    op: Operation,
    next: Next,
    options: RetryLinkOptions,
    observer: Observer<OperationResultEnvelope, Error>,
    state: Mutex<RetryState>,
}

impl RetryRun {
    fn attempt(self: &Arc<Self>, attempts: u32) {
        let mut op = self.op.clone();
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.attempt = attempts;
            op.last_event_id = state.last_event_id.clone();
        }

        let (on_next, on_error, on_complete) = (Arc::clone(self), Arc::clone(self), Arc::clone(self));
        let subscription = self.next.call(op).subscribe(
            PartialObserver::new()
                .next(move |envelope: OperationResultEnvelope| {
                    if let OperationResultEnvelope::Data { id: Some(id), .. } = &envelope {
                        lock(&on_next.state).last_event_id = Some(id.clone());
                    }
                    on_next.observer.next(envelope);
                })
                .error(move |error| on_error.failed(attempts, error))
                .complete(move || on_complete.observer.complete()),
        );

        let mut state = lock(&self.state);
        if state.closed {
            drop(state);
            subscription.unsubscribe();
        } else if state.attempt == attempts {
            state.current = Some(subscription);
        }
    }

    fn failed(self: &Arc<Self>, attempts: u32, error: Error) {
        if !(self.options.retry)(&self.op, &error, attempts) {
            self.observer.error(error);
            return;
        }

        debug!(op_id = self.op.id, attempts, error = %error, "Retrying operation");
        let delay = self
            .options
            .retry_delay
            .as_ref()
            .map(|delay| delay(attempts))
            .filter(|delay| !delay.is_zero());

        match delay {
            None => self.attempt(attempts + 1),
            Some(delay) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    self.attempt(attempts + 1);
                    return;
                };
                let run = Arc::clone(self);
                let timer = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    run.attempt(attempts + 1);
                });
                lock(&self.state).timer = Some(timer);
            }
        }
    }

    fn teardown(&self) {
        let (current, timer) = {
            let mut state = lock(&self.state);
            state.closed = true;
            (state.current.take(), state.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(current) = current {
            current.unsubscribe();
        }
    }
}

/// Re-run the rest of the chain when it fails and `retry` allows it
///
/// `retry` sees the number of attempts made so far, starting at 1. A retried
/// subscription carries the id of the last tracked event it received in
/// `Operation::last_event_id`.
pub fn retry_link(options: RetryLinkOptions) -> OperationLink {
    Arc::new(move |ctx: LinkContext| {
        let LinkContext { op, next } = ctx;
        let options = options.clone();

        Observable::new(move |observer| {
            let run = Arc::new(RetryRun {
                op: op.clone(),
                next: next.clone(),
                options: options.clone(),
                observer,
                state: Mutex::new(RetryState {
                    attempt: 0,
                    current: None,
                    timer: None,
                    last_event_id: op.last_event_id.clone(),
                    closed: false,
                }),
            });
            run.attempt(1);
            Teardown::new(move || run.teardown())
        })
    })
}
