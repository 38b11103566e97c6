use super::{LinkContext, OperationLink};
use crate::params::EdenRequestParams;
use crate::resolve::active_transformer;
use crate::ws::WsClient;
use eden_core::observable::lock;
use eden_core::{
    EdenResult, Error, Observable, OperationResultEnvelope, OperationType, PartialObserver,
    Subscription, Teardown, TransformerInput,
};
use std::sync::{Arc, Mutex};

/// Terminal link sending every operation over `client`
///
/// Inputs are serialized and results deserialized with the operation's
/// transformer, or `transformer` when the operation has none. Subscriptions
/// also receive `State` envelopes for every connection-state change.
pub fn ws_link(client: WsClient, transformer: Option<TransformerInput>) -> OperationLink {
    Arc::new(move |ctx: LinkContext| {
        let op = ctx.op;
        let mut params = op.resolved_params(&EdenRequestParams::default());
        if params.transformer.is_none() {
            params.transformer = transformer.clone();
        }
        let transformer = active_transformer(&params);

        let input = params.input();
        let input = match &transformer {
            Some(transformer) => match transformer.serialize(&input) {
                Ok(input) => input,
                Err(error) => return Observable::throw(error),
            },
            None => input,
        };

        let request = client.request(op.op_type, op.path.clone(), input, op.last_event_id.clone());
        let state = (op.op_type == OperationType::Subscription).then(|| client.connection_state());
        let transformer = transformer.clone();

        Observable::new(move |observer| {
            let state_subscription = state.as_ref().map(|state| {
                let relay = observer.clone();
                state.subscribe(
                    PartialObserver::new()
                        .next(move |s| relay.next(OperationResultEnvelope::State(s))),
                )
            });

            let transformer = transformer.clone();
            let (on_next, on_error, on_complete) = (observer.clone(), observer.clone(), observer.clone());
            let request_subscription = request.subscribe(
                PartialObserver::new()
                    .next(move |envelope| match (envelope, &transformer) {
                        (OperationResultEnvelope::Data { id, result }, Some(transformer)) => {
                            match deserialize(result, transformer) {
                                Ok(result) => on_next.next(OperationResultEnvelope::Data { id, result }),
                                Err(error) => on_next.error(error),
                            }
                        }
                        (envelope, _) => on_next.next(envelope),
                    })
                    .error(move |error| on_error.error(error))
                    .complete(move || on_complete.complete()),
            );

            let subscriptions: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(
                state_subscription.into_iter().chain([request_subscription]).collect(),
            ));
            Teardown::new(move || {
                for subscription in lock(&subscriptions).drain(..) {
                    subscription.unsubscribe();
                }
            })
        })
    })
}

fn deserialize(
    mut result: EdenResult,
    transformer: &eden_core::ResolvedTransformer,
) -> Result<EdenResult, Error> {
    if let Some(data) = result.data.as_json() {
        result.data = transformer.deserialize(data)?.into();
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::create_chain;
    use crate::operation::Operation;
    use crate::ws::WsClientOptions;

    #[tokio::test]
    async fn test_serialize_failure_errors_operation() {
        let client = WsClient::new(WsClientOptions::new("ws://127.0.0.1:1").with_lazy(10)).unwrap();
        let failing = TransformerInput::single(Arc::new(eden_core::FnTransformer::new(
            |_| Err(Error::Transformer("nope".to_string())),
            |v| Ok(v.clone()),
        )));
        let links: Arc<[OperationLink]> = Arc::from(vec![ws_link(client.clone(), Some(failing))]);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        create_chain(links, Operation::new(1, OperationType::Query, "/x"))
            .subscribe(PartialObserver::new().error(move |e| sink.lock().unwrap().push(e)));

        assert_eq!(*errors.lock().unwrap(), vec![Error::Transformer("nope".to_string())]);
        assert_eq!(client.outstanding(), 0);
    }
}
