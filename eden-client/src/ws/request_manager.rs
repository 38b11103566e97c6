//! Bookkeeping for in-flight WebSocket requests
//!
//! Every request is registered as `Outgoing`, becomes `Pending` once it has
//! been written to a socket and is removed when it settles. Subscriptions
//! stay registered across many `data` messages and across reconnects.

use eden_core::{Error, Id, Observer, OperationResultEnvelope, WsRequest};
use indexmap::IndexMap;

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Registered but not yet written to a socket
    Outgoing,
    /// Written to the current socket, waiting for responses
    Pending,
}

/// A registered request and the observer waiting on it
pub struct RequestEntry {
    pub message: WsRequest,
    pub observer: Observer<OperationResultEnvelope, Error>,
    pub state: RequestState,
}

/// Requests keyed by message id, in registration order
#[derive(Default)]
pub struct RequestManager {
    requests: IndexMap<Id, RequestEntry>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, message: WsRequest, observer: Observer<OperationResultEnvelope, Error>) {
        self.requests.insert(
            message.id.clone(),
            RequestEntry {
                message,
                observer,
                state: RequestState::Outgoing,
            },
        );
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut RequestEntry> {
        self.requests.get_mut(id)
    }

    pub fn remove(&mut self, id: &Id) -> Option<RequestEntry> {
        self.requests.shift_remove(id)
    }

    /// Mark every outgoing request pending and return their messages
    pub fn take_outgoing(&mut self) -> Vec<WsRequest> {
        self.requests
            .values_mut()
            .filter(|entry| entry.state == RequestState::Outgoing)
            .map(|entry| {
                entry.state = RequestState::Pending;
                entry.message.clone()
            })
            .collect()
    }

    /// Requeue everything, e.g. after the socket they were written to closed
    pub fn mark_all_outgoing(&mut self) {
        for entry in self.requests.values_mut() {
            entry.state = RequestState::Outgoing;
        }
    }

    /// Remove and return every request that is not a subscription
    pub fn drain_non_subscriptions(&mut self) -> Vec<RequestEntry> {
        let ids: Vec<Id> = self
            .requests
            .iter()
            .filter(|(_, entry)| !entry.message.is_subscription())
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| self.requests.shift_remove(id)).collect()
    }

    pub fn drain_all(&mut self) -> Vec<RequestEntry> {
        self.requests.drain(..).map(|(_, entry)| entry).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn pending_count(&self) -> usize {
        self.count(RequestState::Pending)
    }

    pub fn outgoing_count(&self) -> usize {
        self.count(RequestState::Outgoing)
    }

    fn count(&self, state: RequestState) -> usize {
        self.requests.values().filter(|entry| entry.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eden_core::{Observable, PartialObserver, Teardown, WsMethod, WsRequestParams};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// An observer that is live until the test ends
    fn observer() -> Observer<OperationResultEnvelope, Error> {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let source: Observable<OperationResultEnvelope, Error> = Observable::new(move |observer| {
            *sink.lock().unwrap() = Some(observer);
            Teardown::None
        });
        source.subscribe(PartialObserver::new());
        let observer = slot.lock().unwrap().take().unwrap();
        observer
    }

    fn request(id: i64, method: WsMethod) -> WsRequest {
        WsRequest::new(
            Id::Number(id),
            method,
            WsRequestParams {
                path: "/x".to_string(),
                input: json!(null),
                last_event_id: None,
            },
        )
    }

    #[test]
    fn test_outgoing_then_pending() {
        let mut manager = RequestManager::new();
        manager.register(request(1, WsMethod::Query), observer());
        manager.register(request(2, WsMethod::Subscription), observer());
        assert_eq!(manager.outgoing_count(), 2);

        let flushed = manager.take_outgoing();
        assert_eq!(flushed.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), vec![Id::Number(1), Id::Number(2)]);
        assert_eq!(manager.pending_count(), 2);
        assert!(manager.take_outgoing().is_empty());

        manager.mark_all_outgoing();
        assert_eq!(manager.outgoing_count(), 2);
    }

    #[test]
    fn test_drain_non_subscriptions_keeps_subscriptions() {
        let mut manager = RequestManager::new();
        manager.register(request(1, WsMethod::Query), observer());
        manager.register(request(2, WsMethod::Subscription), observer());
        manager.register(request(3, WsMethod::Mutation), observer());

        let drained = manager.drain_non_subscriptions();

        assert_eq!(drained.len(), 2);
        assert_eq!(manager.len(), 1);
        assert!(manager.get_mut(&Id::Number(2)).is_some());
    }

    #[test]
    fn test_remove_and_drain_all() {
        let mut manager = RequestManager::new();
        manager.register(request(1, WsMethod::Query), observer());
        manager.register(request(2, WsMethod::Query), observer());

        assert!(manager.remove(&Id::Number(1)).is_some());
        assert!(manager.remove(&Id::Number(1)).is_none());
        assert_eq!(manager.drain_all().len(), 1);
        assert!(manager.is_empty());
    }
}
