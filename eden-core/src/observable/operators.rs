//! Operators for [`Observable::pipe`]
//!
//! Each operator is a function returning a closure `Observable -> Observable`
//! so chains read left to right:
//!
//! ```rust
//! use eden_core::observable::{distinct_until_changed, map, Observable};
//!
//! let doubled = Observable::<i32, ()>::from_values(vec![1, 1, 2])
//!     .pipe(distinct_until_changed())
//!     .pipe(map(|v| v * 2));
//! # let _ = doubled;
//! ```

use super::{lock, Observable, Observer, PartialObserver, Subscription, Teardown};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Transform each value
pub fn map<T, U, E, F>(f: F) -> impl FnOnce(Observable<T, E>) -> Observable<U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    move |source| {
        let f = Arc::new(f);
        Observable::new(move |observer: Observer<U, E>| {
            let f = Arc::clone(&f);
            let on_error = observer.clone();
            let on_complete = observer.clone();
            let subscription = source.subscribe(
                PartialObserver::new()
                    .next(move |value| observer.next(f(value)))
                    .error(move |error| on_error.error(error))
                    .complete(move || on_complete.complete()),
            );
            subscription.into()
        })
    }
}

/// Forward only values matching `predicate`
pub fn filter<T, E, P>(predicate: P) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    move |source| {
        let predicate = Arc::new(predicate);
        Observable::new(move |observer: Observer<T, E>| {
            let predicate = Arc::clone(&predicate);
            let on_error = observer.clone();
            let on_complete = observer.clone();
            let subscription = source.subscribe(
                PartialObserver::new()
                    .next(move |value| {
                        if predicate(&value) {
                            observer.next(value);
                        }
                    })
                    .error(move |error| on_error.error(error))
                    .complete(move || on_complete.complete()),
            );
            subscription.into()
        })
    }
}

type TapFn<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Side-effect callbacks for [`tap`]
pub struct Tap<T, E> {
    next: Option<TapFn<T>>,
    error: Option<TapFn<E>>,
    complete: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T, E> Tap<T, E> {
    /// No side effects
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Inspect each value
    pub fn next(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    /// Inspect the terminal error
    pub fn error(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Observe completion
    pub fn complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T, E> Default for Tap<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run side effects without changing the stream
pub fn tap<T, E>(callbacks: Tap<T, E>) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    move |source| {
        let callbacks = Arc::new(callbacks);
        Observable::new(move |observer: Observer<T, E>| {
            let (on_next, on_error, on_complete) = (
                Arc::clone(&callbacks),
                Arc::clone(&callbacks),
                Arc::clone(&callbacks),
            );
            let error_observer = observer.clone();
            let complete_observer = observer.clone();
            let subscription = source.subscribe(
                PartialObserver::new()
                    .next(move |value| {
                        if let Some(f) = &on_next.next {
                            f(&value);
                        }
                        observer.next(value);
                    })
                    .error(move |error| {
                        if let Some(f) = &on_error.error {
                            f(&error);
                        }
                        error_observer.error(error);
                    })
                    .complete(move || {
                        if let Some(f) = &on_complete.complete {
                            f();
                        }
                        complete_observer.complete();
                    }),
            );
            subscription.into()
        })
    }
}

enum SharedSource {
    Idle,
    Running {
        generation: u64,
        subscription: Option<Subscription>,
    },
}

struct ShareState<T, E> {
    observers: Vec<(u64, Observer<T, E>)>,
    next_key: u64,
    generation: u64,
    source: SharedSource,
}

/// Multicast one upstream subscription to every subscriber
///
/// The upstream is subscribed when the first subscriber arrives and
/// unsubscribed when the last one leaves. After the upstream errors or
/// completes the share resets, so the next subscriber starts it again.
pub fn share<T, E>() -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    |source| {
        let state = Arc::new(Mutex::new(ShareState {
            observers: Vec::new(),
            next_key: 0,
            generation: 0,
            source: SharedSource::Idle,
        }));

        Observable::new(move |observer: Observer<T, E>| {
            let (key, start) = {
                let mut guard = lock(&state);
                let key = guard.next_key;
                guard.next_key += 1;
                guard.observers.push((key, observer));
                let start = if matches!(guard.source, SharedSource::Idle) {
                    guard.generation += 1;
                    let generation = guard.generation;
                    guard.source = SharedSource::Running {
                        generation,
                        subscription: None,
                    };
                    Some(generation)
                } else {
                    None
                };
                (key, start)
            };

            if let Some(generation) = start {
                connect(&source, &state, generation);
            }

            let state = Arc::clone(&state);
            Teardown::new(move || {
                let upstream = {
                    let mut guard = lock(&state);
                    guard.observers.retain(|(k, _)| *k != key);
                    if guard.observers.is_empty() {
                        match std::mem::replace(&mut guard.source, SharedSource::Idle) {
                            SharedSource::Running { subscription, .. } => subscription,
                            SharedSource::Idle => None,
                        }
                    } else {
                        None
                    }
                };
                if let Some(subscription) = upstream {
                    subscription.unsubscribe();
                }
            })
        })
    }
}

fn connect<T, E>(source: &Observable<T, E>, state: &Arc<Mutex<ShareState<T, E>>>, generation: u64)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let snapshot = |state: &Arc<Mutex<ShareState<T, E>>>| -> Vec<Observer<T, E>> {
        lock(state).observers.iter().map(|(_, o)| o.clone()).collect()
    };
    let finish = move |state: &Arc<Mutex<ShareState<T, E>>>| -> Vec<Observer<T, E>> {
        let mut guard = lock(state);
        if matches!(guard.source, SharedSource::Running { generation: g, .. } if g == generation)
        {
            guard.source = SharedSource::Idle;
        }
        std::mem::take(&mut guard.observers)
            .into_iter()
            .map(|(_, o)| o)
            .collect()
    };

    let (on_next, on_error, on_complete) = (Arc::clone(state), Arc::clone(state), Arc::clone(state));
    let subscription = source.subscribe(
        PartialObserver::new()
            .next(move |value: T| {
                for observer in snapshot(&on_next) {
                    observer.next(value.clone());
                }
            })
            .error(move |error: E| {
                for observer in finish(&on_error) {
                    observer.error(error.clone());
                }
            })
            .complete(move || {
                for observer in finish(&on_complete) {
                    observer.complete();
                }
            }),
    );

    let stale = {
        let mut guard = lock(state);
        match &mut guard.source {
            SharedSource::Running {
                generation: g,
                subscription: slot,
            } if *g == generation => {
                *slot = Some(subscription);
                None
            }
            _ => Some(subscription),
        }
    };
    // The upstream finished or every subscriber left while it was starting
    if let Some(subscription) = stale {
        subscription.unsubscribe();
    }
}

/// Suppress values equal to the previous one
pub fn distinct_until_changed<T, E>() -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Clone + PartialEq + Send + 'static,
    E: Send + 'static,
{
    |source| {
        Observable::new(move |observer: Observer<T, E>| {
            let last: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
            let gate = observer.clone();
            let on_error = observer.clone();
            let on_complete = observer;
            source
                .subscribe(
                    PartialObserver::new()
                        .next(move |value: T| {
                            let changed = {
                                let mut last = lock(&last);
                                if last.as_ref() == Some(&value) {
                                    false
                                } else {
                                    *last = Some(value.clone());
                                    true
                                }
                            };
                            if changed {
                                gate.next(value);
                            }
                        })
                        .error(move |error| on_error.error(error))
                        .complete(move || on_complete.complete()),
                )
                .into()
        })
    }
}

/// Suppress values whose JSON representation equals the previous one
///
/// Useful for payloads that are rebuilt on every emission, such as
/// connection states carrying fresh error values.
pub fn distinct_until_deep_changed<T, E>() -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Serialize + Send + 'static,
    E: Send + 'static,
{
    |source| {
        Observable::new(move |observer: Observer<T, E>| {
            let last: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
            let gate = observer.clone();
            let on_error = observer.clone();
            let on_complete = observer;
            source
                .subscribe(
                    PartialObserver::new()
                        .next(move |value: T| {
                            let changed = match serde_json::to_value(&value) {
                                Ok(json) => {
                                    let mut last = lock(&last);
                                    if last.as_ref() == Some(&json) {
                                        false
                                    } else {
                                        *last = Some(json);
                                        true
                                    }
                                }
                                // Values that cannot be compared are always forwarded
                                Err(_) => true,
                            };
                            if changed {
                                gate.next(value);
                            }
                        })
                        .error(move |error| on_error.error(error))
                        .complete(move || on_complete.complete()),
                )
                .into()
        })
    }
}
