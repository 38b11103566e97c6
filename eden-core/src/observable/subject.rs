use super::{lock, Observable, Observer, Teardown};
use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

struct SubjectState<T> {
    value: T,
    version: u64,
    listeners: Vec<(u64, Listener<T>)>,
    next_key: u64,
}

/// Holds a current value and replays it to every new subscriber
///
/// Setting a value equal to the current one is a no-op, so subscribers only
/// see transitions. The WebSocket client exposes its connection state this way.
pub struct BehaviorSubject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for BehaviorSubject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> BehaviorSubject<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create a subject holding `initial`
    pub fn new(initial: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                value: initial,
                version: 0,
                listeners: Vec::new(),
                next_key: 0,
            })),
        }
    }

    /// The current value
    pub fn get(&self) -> T {
        lock(&self.state).value.clone()
    }

    /// Replace the current value and notify subscribers if it changed
    pub fn next(&self, value: T) {
        let listeners: Vec<Listener<T>> = {
            let mut state = lock(&self.state);
            if state.value == value {
                return;
            }
            state.value = value.clone();
            state.version += 1;
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(value.clone());
        }
    }

    /// Observe the current value followed by every change
    ///
    /// The returned observable never completes on its own.
    pub fn observable<E: Send + 'static>(&self) -> Observable<T, E> {
        let state = Arc::clone(&self.state);
        Observable::new(move |observer: Observer<T, E>| {
            let (current, seen_version) = {
                let state = lock(&state);
                (state.value.clone(), state.version)
            };
            observer.next(current);

            let listener: Listener<T> = {
                let observer = observer.clone();
                Arc::new(move |value| observer.next(value))
            };
            let (key, missed) = {
                let mut state = lock(&state);
                let key = state.next_key;
                state.next_key += 1;
                state.listeners.push((key, listener));
                let missed = (state.version != seen_version).then(|| state.value.clone());
                (key, missed)
            };
            // A change landed between the replay and registration
            if let Some(value) = missed {
                observer.next(value);
            }

            let state = Arc::clone(&state);
            Teardown::new(move || {
                lock(&state).listeners.retain(|(k, _)| *k != key);
            })
        })
    }

    /// Number of live subscribers
    pub fn observer_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}
