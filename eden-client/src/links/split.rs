use super::{create_chain, LinkContext, OperationLink};
use crate::operation::Operation;
use std::sync::Arc;

/// Route each operation to one of two sub-chains
///
/// `condition` picks `true_links` when it returns true, `false_links`
/// otherwise. Links after the split in the outer chain are never reached;
/// each branch must end with its own terminal link.
pub fn split_link<F>(
    condition: F,
    true_links: Vec<OperationLink>,
    false_links: Vec<OperationLink>,
) -> OperationLink
where
    F: Fn(&Operation) -> bool + Send + Sync + 'static,
{
    let true_links: Arc<[OperationLink]> = Arc::from(true_links);
    let false_links: Arc<[OperationLink]> = Arc::from(false_links);

    Arc::new(move |ctx: LinkContext| {
        let branch = if condition(&ctx.op) {
            Arc::clone(&true_links)
        } else {
            Arc::clone(&false_links)
        };
        create_chain(branch, ctx.op)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eden_core::observable::observable_to_future;
    use eden_core::{EdenResult, Error, Observable, OperationResultEnvelope, OperationType, Teardown};
    use serde_json::json;

    fn answer(value: &'static str) -> OperationLink {
        Arc::new(move |_ctx: LinkContext| {
            Observable::new(move |observer| {
                observer.next(OperationResultEnvelope::data(EdenResult::ok(json!(value))));
                observer.complete();
                Teardown::None
            })
        })
    }

    fn split() -> Arc<[OperationLink]> {
        Arc::from(vec![split_link(
            |op| op.op_type == OperationType::Subscription,
            vec![answer("ws")],
            vec![answer("http")],
        )])
    }

    async fn route(op_type: OperationType) -> OperationResultEnvelope {
        observable_to_future(&create_chain(split(), Operation::new(1, op_type, "/x")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_condition() {
        let ws = route(OperationType::Subscription).await;
        let http = route(OperationType::Query).await;
        assert_eq!(ws.as_result().and_then(|r| r.json()), Some(&json!("ws")));
        assert_eq!(http.as_result().and_then(|r| r.json()), Some(&json!("http")));
    }

    #[tokio::test]
    async fn test_empty_branch_fails() {
        let links: Arc<[OperationLink]> = Arc::from(vec![split_link(|_| true, vec![], vec![answer("x")])]);
        let outcome =
            observable_to_future(&create_chain(links, Operation::new(1, OperationType::Query, "/"))).await;
        assert_eq!(
            outcome.map_err(|e| e.into_error()),
            Err(Some(Error::Config("No more links to execute".to_string())))
        );
    }
}
