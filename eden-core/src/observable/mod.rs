//! Minimal push-based observable with synchronous teardown
//!
//! Every eden operation is an [`Observable`]: links wrap the observable
//! produced by the next link, terminal links produce one from a transport, and
//! the client facade finally subscribes to the outermost one.
//!
//! # Contract
//!
//! - `subscribe` runs the producer synchronously and returns a [`Subscription`]
//! - At most one terminal event (`error` or `complete`) reaches the observer;
//!   any `next` after it is silently dropped
//! - After a terminal event the producer's teardown runs
//! - Calling `unsubscribe` before the producer has returned its teardown
//!   defers the teardown until the producer returns
//! - Panics inside a producer are not caught; producers route failures to
//!   `observer.error`
//!
//! There is no backing event loop. Producers that need asynchrony spawn their
//! own tasks and return a teardown that cancels them.
//!
//! # Examples
//!
//! ```rust
//! use eden_core::observable::{Observable, PartialObserver, Teardown};
//! use std::sync::{Arc, Mutex};
//!
//! let numbers: Observable<i32, ()> = Observable::new(|observer| {
//!     observer.next(1);
//!     observer.next(2);
//!     observer.complete();
//!     observer.next(3); // dropped
//!     Teardown::None
//! });
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! numbers.subscribe(PartialObserver::new().next(move |v| sink.lock().unwrap().push(v)));
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
//! ```

mod bridge;
mod operators;
mod subject;

pub use bridge::{
    observable_to_future, observable_to_stream, ObservableError, ObservableFuture,
    ObservableStream,
};
pub use operators::{
    distinct_until_changed, distinct_until_deep_changed, filter, map, share, tap, Tap,
};
pub use subject::BehaviorSubject;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Cleanup returned by a producer
pub enum Teardown {
    /// Nothing to clean up
    None,
    /// Run a closure once
    Fn(Box<dyn FnOnce() + Send>),
    /// Unsubscribe from an upstream subscription
    Subscription(Subscription),
    /// Run several teardowns in order
    Many(Vec<Teardown>),
}

impl Teardown {
    /// Teardown that runs `f` once
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Teardown::Fn(Box::new(f))
    }

    fn run(self) {
        match self {
            Teardown::None => {}
            Teardown::Fn(f) => f(),
            Teardown::Subscription(subscription) => subscription.unsubscribe(),
            Teardown::Many(all) => {
                for teardown in all {
                    teardown.run();
                }
            }
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Teardown::Subscription(subscription)
    }
}

enum TeardownSlot {
    /// The producer has not returned yet
    Subscribing { unsubscribe_requested: bool },
    /// The producer returned and the subscription is live
    Ready(Teardown),
    /// Teardown already ran
    Finished,
}

struct SubscriptionState {
    done: AtomicBool,
    slot: Mutex<TeardownSlot>,
}

impl SubscriptionState {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            slot: Mutex::new(TeardownSlot::Subscribing {
                unsubscribe_requested: false,
            }),
        }
    }

    fn release(&self) {
        let teardown = {
            let mut slot = lock(&self.slot);
            match std::mem::replace(&mut *slot, TeardownSlot::Finished) {
                TeardownSlot::Subscribing { .. } => {
                    *slot = TeardownSlot::Subscribing {
                        unsubscribe_requested: true,
                    };
                    None
                }
                TeardownSlot::Ready(teardown) => Some(teardown),
                TeardownSlot::Finished => None,
            }
        };
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }

    fn install(&self, teardown: Teardown) {
        let run_now = {
            let mut slot = lock(&self.slot);
            match std::mem::replace(&mut *slot, TeardownSlot::Finished) {
                TeardownSlot::Subscribing {
                    unsubscribe_requested: false,
                } => {
                    *slot = TeardownSlot::Ready(teardown);
                    None
                }
                TeardownSlot::Subscribing {
                    unsubscribe_requested: true,
                } => Some(teardown),
                TeardownSlot::Ready(previous) => {
                    *slot = TeardownSlot::Ready(previous);
                    Some(teardown)
                }
                TeardownSlot::Finished => Some(teardown),
            }
        };
        if let Some(teardown) = run_now {
            teardown.run();
        }
    }
}

/// Handle to a live subscription
#[derive(Clone)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    /// A subscription that is already closed
    pub fn closed() -> Self {
        let state = SubscriptionState::new();
        state.done.store(true, Ordering::SeqCst);
        *lock(&state.slot) = TeardownSlot::Finished;
        Self {
            state: Arc::new(state),
        }
    }

    /// Stop receiving events and run the producer's teardown
    ///
    /// Idempotent. If the producer is still running, teardown is deferred
    /// until it returns.
    pub fn unsubscribe(&self) {
        self.state.done.store(true, Ordering::SeqCst);
        self.state.release();
    }

    /// Whether the subscription was unsubscribed or saw a terminal event
    pub fn is_closed(&self) -> bool {
        self.state.done.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Caller-supplied callbacks, any of which may be omitted
pub struct PartialObserver<T, E> {
    next: Option<NextFn<T>>,
    error: Option<NextFn<E>>,
    complete: Option<CompleteFn>,
}

impl<T, E> PartialObserver<T, E> {
    /// An observer that ignores every event
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Handle values
    pub fn next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    /// Handle the terminal error
    pub fn error(mut self, f: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Handle completion
    pub fn complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T, E> Default for PartialObserver<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

struct ObserverInner<T, E> {
    callbacks: PartialObserver<T, E>,
    state: Arc<SubscriptionState>,
}

/// Observer handed to a producer
///
/// Cheap to clone; every clone gates on the same subscription, so a terminal
/// event from one clone silences the others.
pub struct Observer<T, E> {
    inner: Arc<ObserverInner<T, E>>,
}

impl<T, E> Clone for Observer<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Observer<T, E> {
    /// Emit a value; dropped after a terminal event or unsubscribe
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        if let Some(f) = &self.inner.callbacks.next {
            f(value);
        }
    }

    /// Emit the terminal error and tear the subscription down
    pub fn error(&self, error: E) {
        if self.inner.state.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(f) = &self.inner.callbacks.error {
            f(error);
        }
        self.inner.state.release();
    }

    /// Complete and tear the subscription down
    pub fn complete(&self) {
        if self.inner.state.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(f) = &self.inner.callbacks.complete {
            f();
        }
        self.inner.state.release();
    }

    /// Whether further events would be dropped
    pub fn is_closed(&self) -> bool {
        self.inner.state.done.load(Ordering::SeqCst)
    }
}

type Producer<T, E> = dyn Fn(Observer<T, E>) -> Teardown + Send + Sync;

/// A lazy, push-based stream of `T` values that may fail with `E`
pub struct Observable<T, E> {
    producer: Arc<Producer<T, E>>,
}

impl<T, E> Clone for Observable<T, E> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Observable<T, E> {
    /// Create an observable from a producer function
    ///
    /// The producer runs once per subscription.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(Observer<T, E>) -> Teardown + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// An observable that fails immediately with `error`
    pub fn throw(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::new(move |observer| {
            observer.error(error.clone());
            Teardown::None
        })
    }

    /// An observable that emits `values` and completes
    pub fn from_values(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(move |observer| {
            for value in values.iter().cloned() {
                observer.next(value);
            }
            observer.complete();
            Teardown::None
        })
    }

    /// Run the producer with `observer`
    pub fn subscribe(&self, observer: PartialObserver<T, E>) -> Subscription {
        let state = Arc::new(SubscriptionState::new());
        let observer = Observer {
            inner: Arc::new(ObserverInner {
                callbacks: observer,
                state: Arc::clone(&state),
            }),
        };

        let teardown = (self.producer)(observer);
        state.install(teardown);

        Subscription { state }
    }

    /// Subscribe and relay every event to an existing observer
    ///
    /// Links use this to pass a downstream observable through unchanged.
    pub fn subscribe_with(&self, observer: &Observer<T, E>) -> Subscription {
        let on_next = observer.clone();
        let on_error = observer.clone();
        let on_complete = observer.clone();
        self.subscribe(
            PartialObserver::new()
                .next(move |value| on_next.next(value))
                .error(move |error| on_error.error(error))
                .complete(move || on_complete.complete()),
        )
    }

    /// Apply an operator; chain calls to compose several
    pub fn pipe<U, F, O>(self, operator: O) -> Observable<U, F>
    where
        O: FnOnce(Self) -> Observable<U, F>,
    {
        operator(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        (values, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn test_next_after_complete_is_dropped() {
        let source: Observable<i32, String> = Observable::new(|observer| {
            observer.next(1);
            observer.complete();
            observer.next(2);
            observer.error("late".to_string());
            Teardown::None
        });

        let (values, push) = recorder();
        let errors = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));
        let (e, c) = (errors.clone(), completes.clone());

        source.subscribe(
            PartialObserver::new()
                .next(push)
                .error(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                })
                .complete(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        );

        assert_eq!(*values.lock().unwrap(), vec![1]);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(completes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_next_after_error_is_dropped() {
        let source: Observable<i32, &'static str> = Observable::new(|observer| {
            observer.error("boom");
            observer.next(1);
            observer.complete();
            Teardown::None
        });

        let (values, push) = recorder();
        let (errors, push_error) = recorder();
        source.subscribe(PartialObserver::new().next(push).error(push_error));

        assert!(values.lock().unwrap().is_empty());
        assert_eq!(*errors.lock().unwrap(), vec!["boom"]);
    }

    #[test]
    fn test_unsubscribe_runs_teardown() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = torn_down.clone();
        let source: Observable<(), ()> = Observable::new(move |_observer| {
            let flag = flag.clone();
            Teardown::new(move || flag.store(true, Ordering::SeqCst))
        });

        let subscription = source.subscribe(PartialObserver::new());
        assert!(!torn_down.load(Ordering::SeqCst));

        subscription.unsubscribe();
        assert!(torn_down.load(Ordering::SeqCst));
        assert!(subscription.is_closed());
    }

    #[test]
    fn test_terminal_event_during_subscribe_defers_teardown() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let source: Observable<i32, ()> = Observable::new(move |observer| {
            observer.next(1);
            observer.complete();
            let counter = counter.clone();
            Teardown::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let subscription = source.subscribe(PartialObserver::new());

        // Teardown ran exactly once, after the producer returned
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        subscription.unsubscribe();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let source: Observable<i32, ()> = Observable::new(move |observer| {
            observer.next(1);
            observer.next(2);
            let counter = counter.clone();
            Teardown::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let (values, push) = recorder();
        let subscription = source.subscribe(PartialObserver::new().next(push));
        subscription.unsubscribe();
        subscription.clone().unsubscribe();

        assert_eq!(*values.lock().unwrap(), vec![1, 2]);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_each_subscription_runs_producer() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let source: Observable<i32, ()> = Observable::new(move |observer| {
            counter.fetch_add(1, Ordering::SeqCst);
            observer.complete();
            Teardown::None
        });

        source.subscribe(PartialObserver::new());
        source.subscribe(PartialObserver::new());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pipe_chains_operators() {
        let source = Observable::<i32, ()>::from_values(vec![1, 2, 3, 4]);
        let (values, push) = recorder();

        source
            .pipe(map(|v| v * 10))
            .pipe(filter(|v| *v > 10))
            .subscribe(PartialObserver::new().next(push));

        assert_eq!(*values.lock().unwrap(), vec![20, 30, 40]);
    }
}
