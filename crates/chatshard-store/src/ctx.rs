//! Per-operation context: trace id plus cancellation.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context threaded through every store, scheduler and launcher operation.
///
/// The trace id ties log lines of one request or sweep together; the
/// cancellation token lets callers abandon an operation between retry
/// attempts or while it sits in the launcher queue.
#[derive(Debug, Clone)]
pub struct OpCtx {
    pub trace_id: Uuid,
    pub cancel: CancellationToken,
}

impl OpCtx {
    /// Context for a request that already carries a trace id.
    pub fn new(trace_id: Uuid) -> Self {
        Self {
            trace_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for background work: fresh trace id, never cancelled from
    /// the outside.
    pub fn background() -> Self {
        Self::new(Uuid::new_v4())
    }
}
