use super::{LinkContext, OperationLink};
use eden_core::observable::{tap, Tap};
use eden_core::OperationResultEnvelope;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Log every operation going down the chain and every event coming back
///
/// Outgoing operations and results log at `debug`, failures at `warn`, and
/// completion at `info` with the elapsed time.
pub fn logger_link() -> OperationLink {
    Arc::new(|ctx: LinkContext| {
        let LinkContext { op, next } = ctx;
        let (id, op_type, path) = (op.id, op.op_type, op.path.clone());
        debug!(op_id = id, op_type = %op_type, path = %path, "Operation up");

        let started = Instant::now();
        let (next_path, error_path, complete_path) = (path.clone(), path.clone(), path);
        next.call(op).pipe(tap(
            Tap::new()
                .next(move |envelope: &OperationResultEnvelope| match envelope {
                    OperationResultEnvelope::Data { result, .. } => debug!(
                        op_id = id,
                        path = %next_path,
                        ok = result.is_ok(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Operation result"
                    ),
                    OperationResultEnvelope::State(state) => {
                        debug!(op_id = id, state = state.as_str(), "Connection state")
                    }
                    other => debug!(op_id = id, event = ?other, "Operation event"),
                })
                .error(move |error| {
                    warn!(
                        op_id = id,
                        path = %error_path,
                        error = %error,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Operation failed"
                    )
                })
                .complete(move || {
                    info!(
                        op_id = id,
                        path = %complete_path,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Operation complete"
                    )
                }),
        ))
    })
}
