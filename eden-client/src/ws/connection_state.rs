//! Connection state management
//!
//! Tracks where the socket is in its lifecycle and owns the reconnection
//! strategy.
//!
//! # Connection States
//!
//! - **Idle**: No socket and nothing in progress
//! - **Connecting**: Opening a socket; carries the error that caused the
//!   current reconnection, if any
//! - **Pending**: Socket open; the only state in which requests flush
//!
//! # State Transitions
//!
//! ```text
//! Idle -> Connecting -> Pending
//!  ^          ^            |
//!  |          +-- close ---+
//!  +------ give up / close()
//! ```

use super::reconnect::ReconnectionStrategy;
use crate::metrics::ClientMetrics;
use eden_core::observable::lock;
use eden_core::{BehaviorSubject, ConnectionState, Error, Observable};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Current state plus the reconnection strategy
pub struct ConnectionManager {
    state: BehaviorSubject<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionManager {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>, metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            state: BehaviorSubject::new(ConnectionState::Idle),
            strategy: Mutex::new(strategy),
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// The current state followed by every change
    pub fn observable(&self) -> Observable<ConnectionState, Error> {
        self.state.observable()
    }

    fn set_state(&self, state: ConnectionState) {
        if let Some(metrics) = &self.metrics {
            metrics.update_connection_state(&state);
        }
        self.state.next(state);
    }

    pub fn connecting(&self, error: Option<Error>) {
        self.set_state(ConnectionState::Connecting { error });
    }

    /// Socket open; resets the reconnection strategy
    pub fn connected(&self) {
        lock(&self.strategy).reset();
        self.set_state(ConnectionState::Pending);
    }

    pub fn idle(&self) {
        self.set_state(ConnectionState::Idle);
    }

    /// Delay before reconnection attempt `attempt`, or `None` to give up
    pub fn next_reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        let delay = lock(&self.strategy).next_delay(attempt);
        if delay.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnection_attempt();
            }
        }
        delay
    }
}
