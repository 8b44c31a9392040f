//! HTTP handlers.
//!
//! Mutations (and the state read) answer 403 while this instance is the
//! shadow; downstream failures turn into 500 with the error text as a plain
//! body.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{debug, error};

use chatshard_store::{ControlStore, OpCtx};

use crate::trace::TraceId;
use crate::ApiState;

/// GET /health — the only thing this component really does is reach the
/// store, so that is what health means.
pub async fn health<S>(State(state): State<ApiState<S>>, Extension(trace): Extension<TraceId>) -> Response
where
    S: ControlStore + Clone + 'static,
{
    let ctx = OpCtx::new(trace.0);
    match state.reconciler.ping(&ctx).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!(error = %err, "store unreachable");
            StatusCode::FAILED_DEPENDENCY.into_response()
        }
    }
}

/// POST /mapping/startup
pub async fn startup_mapping<S>(
    State(state): State<ApiState<S>>,
    Extension(trace): Extension<TraceId>,
) -> Response
where
    S: ControlStore + Clone + 'static,
{
    if state.is_shadow() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ctx = OpCtx::new(trace.0);
    match state.scheduler.startup_mapping(&ctx).await {
        Ok(written) => {
            debug!(written, "startup mapping served");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(error = %err, "startup mapping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MigrateParams {
    from: Option<String>,
    to: Option<String>,
    goal_url: Option<String>,
}

/// POST /migrate?from=&to=&goal_url=
pub async fn migrate<S>(
    State(state): State<ApiState<S>>,
    Extension(trace): Extension<TraceId>,
    Query(params): Query<MigrateParams>,
) -> Response
where
    S: ControlStore + Clone + 'static,
{
    if state.is_shadow() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let present = |value: Option<String>| value.filter(|v| !v.is_empty());
    let (Some(from), Some(to), Some(goal_url)) = (
        present(params.from),
        present(params.to),
        present(params.goal_url),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            "query parameters from, to and goal_url are required",
        )
            .into_response();
    };

    let ctx = OpCtx::new(trace.0);
    match state.scheduler.run_migration(&ctx, &from, &to, &goal_url).await {
        Ok(receipt) => {
            debug!(
                worker_id = %receipt.worker_id,
                migration_id = %receipt.migration_id,
                reused_worker = receipt.reused_worker,
                "migration accepted"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!(error = %err, "could not migrate range");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// GET /state
pub async fn system_state<S>(
    State(state): State<ApiState<S>>,
    Extension(trace): Extension<TraceId>,
) -> Response
where
    S: ControlStore + Clone + 'static,
{
    if state.is_shadow() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ctx = OpCtx::new(trace.0);
    match state.scheduler.system_state(&ctx).await {
        Ok(states) => Json(states).into_response(),
        Err(err) => {
            error!(error = %err, "reading system state failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
