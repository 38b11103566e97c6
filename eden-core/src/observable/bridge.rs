//! Conversions from observables to `Future` and `Stream`

use super::{lock, Observable, PartialObserver, Subscription};
use futures::channel::{mpsc, oneshot};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;

/// Why an observable-backed future did not produce a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObservableError<E> {
    /// The observable failed
    #[error("observable failed")]
    Error(E),
    /// The observable completed without emitting a value
    #[error("observable completed without a value")]
    Aborted,
}

impl<E> ObservableError<E> {
    /// The inner error, if the observable failed
    pub fn into_error(self) -> Option<E> {
        match self {
            ObservableError::Error(e) => Some(e),
            ObservableError::Aborted => None,
        }
    }
}

type Settle<T, E> = Arc<Mutex<Option<oneshot::Sender<Result<T, ObservableError<E>>>>>>;

/// Future resolving with the first value of an observable
///
/// Dropping the future unsubscribes.
pub struct ObservableFuture<T, E> {
    rx: oneshot::Receiver<Result<T, ObservableError<E>>>,
    subscription: Subscription,
}

impl<T, E> Future for ObservableFuture<T, E> {
    type Output = Result<T, ObservableError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(ObservableError::Aborted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for ObservableFuture<T, E> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Resolve with the first value, reject with the error, or reject with
/// [`ObservableError::Aborted`] on completion without a value
///
/// The subscription is released as soon as the future settles.
pub fn observable_to_future<T, E>(observable: &Observable<T, E>) -> ObservableFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let sender: Settle<T, E> = Arc::new(Mutex::new(Some(tx)));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let settle = {
        let sender = Arc::clone(&sender);
        let slot = Arc::clone(&slot);
        move |result: Result<T, ObservableError<E>>| {
            let Some(tx) = lock(&sender).take() else {
                return;
            };
            let _ = tx.send(result);
            let subscription = lock(&slot).take();
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
        }
    };
    let settle = Arc::new(settle);
    let (on_next, on_error, on_complete) =
        (Arc::clone(&settle), Arc::clone(&settle), settle);

    let subscription = observable.subscribe(
        PartialObserver::new()
            .next(move |value| on_next(Ok(value)))
            .error(move |error| on_error(Err(ObservableError::Error(error))))
            .complete(move || on_complete(Err(ObservableError::Aborted))),
    );

    *lock(&slot) = Some(subscription.clone());
    // Settled before the slot was filled
    if lock(&sender).is_none() {
        subscription.unsubscribe();
    }

    ObservableFuture { rx, subscription }
}

/// Stream of every value; yields `Err` once on failure and ends on completion
///
/// Dropping the stream unsubscribes.
pub struct ObservableStream<T, E> {
    rx: mpsc::UnboundedReceiver<Result<T, E>>,
    subscription: Subscription,
}

impl<T, E> Stream for ObservableStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl<T, E> Drop for ObservableStream<T, E> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl<T, E> ObservableStream<T, E> {
    /// The underlying subscription
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

/// Adapt an observable into a `Stream`
pub fn observable_to_stream<T, E>(observable: &Observable<T, E>) -> ObservableStream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded();
    let (on_next, on_error, on_complete) = (tx.clone(), tx.clone(), tx);

    let subscription = observable.subscribe(
        PartialObserver::new()
            .next(move |value| {
                let _ = on_next.unbounded_send(Ok(value));
            })
            .error(move |error| {
                let _ = on_error.unbounded_send(Err(error));
                on_error.close_channel();
            })
            .complete(move || on_complete.close_channel()),
    );

    ObservableStream { rx, subscription }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{Observer, Teardown};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_future_resolves_first_value() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let t = teardowns.clone();
        let source = Observable::<i32, ()>::new(move |observer| {
            observer.next(1);
            observer.next(2);
            let t = t.clone();
            Teardown::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
        });

        let value = observable_to_future(&source).await;
        assert_eq!(value, Ok(1));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_future_rejects_with_error() {
        let source = Observable::<i32, &'static str>::throw("boom");
        let result = observable_to_future(&source).await;
        assert_eq!(result, Err(ObservableError::Error("boom")));
    }

    #[tokio::test]
    async fn test_future_aborts_on_empty_completion() {
        let source = Observable::<i32, ()>::from_values(vec![]);
        let result = observable_to_future(&source).await;
        assert_eq!(result, Err(ObservableError::Aborted));
    }

    #[tokio::test]
    async fn test_future_unsubscribes_after_async_value() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let t = teardowns.clone();
        let source = Observable::<i32, ()>::new(move |observer: Observer<i32, ()>| {
            let handle = tokio::spawn(async move {
                tokio::task::yield_now().await;
                observer.next(42);
            });
            let t = t.clone();
            Teardown::new(move || {
                handle.abort();
                t.fetch_add(1, Ordering::SeqCst);
            })
        });

        assert_eq!(observable_to_future(&source).await, Ok(42));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_collects_until_complete() {
        let source = Observable::<i32, ()>::from_values(vec![1, 2, 3]);
        let values: Vec<_> = observable_to_stream(&source).collect().await;
        assert_eq!(values, vec![Ok(1), Ok(2), Ok(3)]);
    }
}
