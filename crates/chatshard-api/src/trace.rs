//! Trace-id assignment middleware.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Fresh trace id attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct TraceId(pub Uuid);

/// Assign a trace id, stash it in the request extensions and wrap the rest
/// of the request in a span carrying it. The id stays in the logs; it is
/// never echoed to the client.
pub async fn assign_trace_id(mut request: Request, next: Next) -> Response {
    let trace_id = Uuid::new_v4();
    request.extensions_mut().insert(TraceId(trace_id));

    let span = tracing::info_span!(
        "request",
        %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    next.run(request).instrument(span).await
}
